//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII semaphores and fences, plus [`PerImageSync`]: the acquire/present semaphores,
//! completion fences and command buffers owned by one swapchain generation. Every
//! swapchain image gets exactly one of each, and the whole group is rebuilt when the
//! image count changes.
//!
//! Creation goes through [`SyncObjectFactory`] so the bookkeeping can be exercised
//! without a device.

use ash::{vk, Device};
use crate::render::backends::vulkan::{VulkanResult, VulkanError};
use crate::render::backends::vulkan::rendering::commands::allocate_command_buffers;

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, fence })
    }

    /// Block until the fence is signaled
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device.wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Whether the fence is currently signaled
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(self.fence).map_err(VulkanError::Api) }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Creates the per-image synchronization objects
pub trait SyncObjectFactory {
    /// Semaphore type; destroyed on drop
    type Semaphore;
    /// Fence type; destroyed on drop
    type Fence;
    /// Command buffer handle; returned through [`SyncObjectFactory::free_command_buffers`]
    type CommandBuffer: Copy;

    /// Create an unsignaled semaphore
    fn create_semaphore(&self) -> VulkanResult<Self::Semaphore>;
    /// Create a fence in the requested state
    fn create_fence(&self, signaled: bool) -> VulkanResult<Self::Fence>;
    /// Allocate `count` primary command buffers
    fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<Self::CommandBuffer>>;
    /// Free command buffers from [`SyncObjectFactory::allocate_command_buffers`]
    fn free_command_buffers(&self, command_buffers: &[Self::CommandBuffer]);
}

/// Factory backed by a logical device and the graphics command pool
#[derive(Clone)]
pub struct DeviceSyncFactory {
    device: Device,
    command_pool: vk::CommandPool,
}

impl DeviceSyncFactory {
    /// The pool must outlive every command buffer this factory allocates
    pub fn new(device: Device, command_pool: vk::CommandPool) -> Self {
        Self { device, command_pool }
    }
}

impl SyncObjectFactory for DeviceSyncFactory {
    type Semaphore = Semaphore;
    type Fence = Fence;
    type CommandBuffer = vk::CommandBuffer;

    fn create_semaphore(&self) -> VulkanResult<Semaphore> {
        Semaphore::new(self.device.clone())
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<Fence> {
        Fence::new(self.device.clone(), signaled)
    }

    fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        allocate_command_buffers(&self.device, self.command_pool, count)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if !command_buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.command_pool, command_buffers) };
        }
    }
}

/// One synchronization group per swapchain image
///
/// Drop frees the command buffers first, then destroys acquire semaphores, present
/// semaphores and fences in field order.
pub struct PerImageSync<F: SyncObjectFactory> {
    command_buffers: Vec<F::CommandBuffer>,
    acquire: Vec<F::Semaphore>,
    present: Vec<F::Semaphore>,
    fences: Vec<F::Fence>,
    factory: F,
}

impl<F: SyncObjectFactory + Clone> PerImageSync<F> {
    /// Create `count` groups with unsignaled semaphores and signaled fences
    pub fn new(factory: &F, count: usize) -> VulkanResult<Self> {
        let mut sync = Self {
            command_buffers: Vec::new(),
            acquire: Vec::with_capacity(count),
            present: Vec::with_capacity(count),
            fences: Vec::with_capacity(count),
            factory: factory.clone(),
        };
        // Objects created before a failure are released by Drop
        for _ in 0..count {
            sync.acquire.push(factory.create_semaphore()?);
            sync.present.push(factory.create_semaphore()?);
            sync.fences.push(factory.create_fence(true)?);
        }
        sync.command_buffers = factory.allocate_command_buffers(count as u32)?;

        log::debug!("Created synchronization objects for {} swapchain images", count);

        Ok(sync)
    }
}

impl<F: SyncObjectFactory> PerImageSync<F> {
    /// Number of groups
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// Whether there are no groups
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Semaphore signalled when group `index`'s image is acquired
    pub fn acquire_semaphore(&self, index: usize) -> Option<&F::Semaphore> {
        self.acquire.get(index)
    }

    /// Semaphore signalled when group `index`'s rendering finishes
    pub fn present_semaphore(&self, index: usize) -> Option<&F::Semaphore> {
        self.present.get(index)
    }

    /// Fence guarding group `index`'s submission
    pub fn fence(&self, index: usize) -> Option<&F::Fence> {
        self.fences.get(index)
    }

    /// Command buffer dedicated to swapchain image `index`
    pub fn command_buffer(&self, index: usize) -> Option<F::CommandBuffer> {
        self.command_buffers.get(index).copied()
    }

    /// Number of command buffers still allocated
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }

    /// Free the command buffers; idempotent
    pub fn free_command_buffers(&mut self) {
        let command_buffers = std::mem::take(&mut self.command_buffers);
        self.factory.free_command_buffers(&command_buffers);
    }
}

impl<F: SyncObjectFactory> Drop for PerImageSync<F> {
    fn drop(&mut self) {
        self.free_command_buffers();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Default)]
    pub(crate) struct Counters {
        pub(crate) semaphores: Cell<usize>,
        pub(crate) fences: Cell<usize>,
        pub(crate) command_buffers: RefCell<Vec<u64>>,
        pub(crate) fail_allocation: Cell<bool>,
        next_handle: Cell<u64>,
    }

    pub(crate) struct MockSemaphore(Rc<Counters>);

    impl Drop for MockSemaphore {
        fn drop(&mut self) {
            self.0.semaphores.set(self.0.semaphores.get() - 1);
        }
    }

    pub(crate) struct MockFence {
        counters: Rc<Counters>,
        pub(crate) signaled: bool,
    }

    impl Drop for MockFence {
        fn drop(&mut self) {
            self.counters.fences.set(self.counters.fences.get() - 1);
        }
    }

    /// Counts live objects instead of touching a device
    #[derive(Default, Clone)]
    pub(crate) struct CountingFactory {
        pub(crate) counters: Rc<Counters>,
    }

    impl SyncObjectFactory for CountingFactory {
        type Semaphore = MockSemaphore;
        type Fence = MockFence;
        type CommandBuffer = u64;

        fn create_semaphore(&self) -> VulkanResult<MockSemaphore> {
            self.counters.semaphores.set(self.counters.semaphores.get() + 1);
            Ok(MockSemaphore(self.counters.clone()))
        }

        fn create_fence(&self, signaled: bool) -> VulkanResult<MockFence> {
            self.counters.fences.set(self.counters.fences.get() + 1);
            Ok(MockFence {
                counters: self.counters.clone(),
                signaled,
            })
        }

        fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<u64>> {
            if self.counters.fail_allocation.get() {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            let mut live = self.counters.command_buffers.borrow_mut();
            let start = self.counters.next_handle.get();
            let handles: Vec<u64> = (start..start + u64::from(count)).collect();
            self.counters.next_handle.set(start + u64::from(count));
            live.extend(&handles);
            Ok(handles)
        }

        fn free_command_buffers(&self, command_buffers: &[u64]) {
            self.counters
                .command_buffers
                .borrow_mut()
                .retain(|handle| !command_buffers.contains(handle));
        }
    }

    impl CountingFactory {
        pub(crate) fn live(&self) -> (usize, usize, usize) {
            (
                self.counters.semaphores.get(),
                self.counters.fences.get(),
                self.counters.command_buffers.borrow().len(),
            )
        }
    }

    #[test]
    fn test_one_group_per_image_with_signaled_fences() {
        let factory = CountingFactory::default();
        let sync = PerImageSync::new(&factory, 3).unwrap();

        assert_eq!(sync.len(), 3);
        assert_eq!(sync.command_buffer_count(), 3);
        assert_eq!(factory.live(), (6, 3, 3));
        assert!((0..3).all(|i| sync.fence(i).is_some_and(|f| f.signaled)));
        assert!(sync.fence(3).is_none());
        assert!(sync.acquire_semaphore(3).is_none());
    }

    #[test]
    fn test_drop_frees_everything() {
        let factory = CountingFactory::default();
        let sync = PerImageSync::new(&factory, 4).unwrap();
        assert_eq!(factory.live(), (8, 4, 4));
        drop(sync);
        assert_eq!(factory.live(), (0, 0, 0));
    }

    #[test]
    fn test_rebuild_tracks_new_image_count() {
        let factory = CountingFactory::default();
        let mut sync = PerImageSync::new(&factory, 3).unwrap();

        for count in [2, 4, 4, 4, 1, 3] {
            drop(sync);
            sync = PerImageSync::new(&factory, count).unwrap();
            assert_eq!(sync.len(), count);
            assert_eq!(factory.live(), (2 * count, count, count));
        }
    }

    #[test]
    fn test_free_command_buffers_is_idempotent() {
        let factory = CountingFactory::default();
        let mut sync = PerImageSync::new(&factory, 2).unwrap();
        sync.free_command_buffers();
        sync.free_command_buffers();
        assert_eq!(sync.command_buffer_count(), 0);
        assert_eq!(factory.live(), (4, 2, 0));
        assert!(sync.command_buffer(0).is_none());

        drop(sync);
        assert_eq!(factory.live(), (0, 0, 0));
    }

    #[test]
    fn test_failed_allocation_releases_created_objects() {
        let factory = CountingFactory::default();
        factory.counters.fail_allocation.set(true);
        assert!(PerImageSync::new(&factory, 3).is_err());
        assert_eq!(factory.live(), (0, 0, 0));
    }
}
