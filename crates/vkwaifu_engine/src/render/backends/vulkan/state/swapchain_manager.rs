//! Swapchain lifecycle and the per-frame acquire/submit/present protocol
//!
//! Everything sized by the swapchain (views, framebuffers, render pass, pipeline,
//! per-image sync objects and command buffers) lives in one [`SwapchainFrames`] value
//! that is rebuilt as a unit on every resize. [`SwapchainSlot`] holds that value and the
//! frame bookkeeping tied to it. The device, pipeline layout, descriptors,
//! uniform buffer and texture are owned elsewhere and persist.

use ash::{vk, Device};
use ash::extensions::khr::Swapchain as SwapchainLoader;
use crate::core::config::{CLEAR_COLOR, FENCE_TIMEOUT};
use crate::render::backends::vulkan::{VulkanResult, VulkanError};
use crate::render::backends::vulkan::initialization::{wait_for_drawable_size, EventPump, Surface};
use crate::render::backends::vulkan::rendering::{
    CommandRecorder, Framebuffer, GraphicsPipeline, PipelineShaders, RenderPass,
};
use crate::render::backends::vulkan::rendering::shader::QUAD_VERTEX_COUNT;
use super::frame::{AcquireOutcome, FrameCursor, ImageOwnership, PendingImage, PresentOutcome};
use super::swapchain::{Swapchain, SwapchainImageViews};
use super::sync::{DeviceSyncFactory, PerImageSync};

/// Lifecycle of the swapchain manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No swapchain: before the first resize, or after a rebuild failed
    Uninitialized,
    /// Inside a rebuild; only seen while [`SwapchainSlot::rebuild`] runs
    Resizing,
    /// Swapchain and per-image objects exist
    Ready,
    /// Torn down for good
    Released,
}

/// What the slot needs to know about one swapchain generation
pub trait SwapchainGeneration {
    /// Number of swapchain images in this generation
    fn image_count(&self) -> usize;
}

/// Objects sized by one swapchain generation
///
/// Drop order: command buffers (in `Drop`), pipeline, render pass, framebuffers, image
/// views, semaphores and fences, and last the swapchain handle.
pub struct SwapchainFrames {
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    framebuffers: Vec<Framebuffer>,
    views: SwapchainImageViews,
    sync: PerImageSync<DeviceSyncFactory>,
    swapchain: Swapchain,
}

impl SwapchainFrames {
    // Anything built before an error is dropped on the way out, command buffers included
    fn build(
        device: &Device,
        factory: &DeviceSyncFactory,
        swapchain: Swapchain,
        pipeline_layout: vk::PipelineLayout,
        shaders: &PipelineShaders,
    ) -> VulkanResult<Self> {
        let views = SwapchainImageViews::new(device.clone(), &swapchain)?;
        let sync = PerImageSync::new(factory, swapchain.image_count())?;
        let render_pass = RenderPass::new_presentation_pass(device.clone(), swapchain.format().format)?;
        let framebuffers = Framebuffer::for_views(device, render_pass.handle(), views.views(), swapchain.extent())?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass.handle(),
            pipeline_layout,
            shaders,
            swapchain.extent(),
        )?;

        Ok(Self {
            pipeline,
            render_pass,
            framebuffers,
            views,
            sync,
            swapchain,
        })
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Per-image synchronization objects
    pub fn sync(&self) -> &PerImageSync<DeviceSyncFactory> {
        &self.sync
    }

    /// Number of framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Color views, indexed like the swapchain images
    pub fn image_views(&self) -> &[vk::ImageView] {
        self.views.views()
    }
}

impl SwapchainGeneration for SwapchainFrames {
    fn image_count(&self) -> usize {
        SwapchainFrames::image_count(self)
    }
}

impl Drop for SwapchainFrames {
    fn drop(&mut self) {
        self.sync.free_command_buffers();
    }
}

/// The live generation plus the frame bookkeeping that is only valid for it
///
/// Cursor, image ownership and the pending image are reset whenever the generation
/// changes, so they never index past the current image count.
pub struct SwapchainSlot<G> {
    current: Option<G>,
    cursor: FrameCursor,
    ownership: ImageOwnership,
    pending: PendingImage,
    state: ManagerState,
    generation: u64,
}

impl<G: SwapchainGeneration> Default for SwapchainSlot<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: SwapchainGeneration> SwapchainSlot<G> {
    /// Empty slot in [`ManagerState::Uninitialized`]
    pub fn new() -> Self {
        Self {
            current: None,
            cursor: FrameCursor::default(),
            ownership: ImageOwnership::default(),
            pending: PendingImage::default(),
            state: ManagerState::Uninitialized,
            generation: 0,
        }
    }

    /// Replace the generation with what `build` returns
    ///
    /// `build` receives the previous generation and owns it from then on. On error the
    /// slot is left empty in [`ManagerState::Uninitialized`] and the next rebuild starts
    /// from scratch.
    pub fn rebuild<B>(&mut self, build: B) -> VulkanResult<()>
    where
        B: FnOnce(Option<G>) -> VulkanResult<G>,
    {
        if self.state == ManagerState::Released {
            return Err(VulkanError::InvalidOperation {
                reason: "resize after release".to_string(),
            });
        }

        self.state = ManagerState::Resizing;
        self.pending.clear();
        self.cursor.reset(0);
        self.ownership.reset(0);
        let old = self.current.take();

        match build(old) {
            Ok(next) => {
                let count = next.image_count();
                self.cursor.reset(count);
                self.ownership.reset(count);
                self.current = Some(next);
                self.state = ManagerState::Ready;
                self.generation += 1;
                Ok(())
            }
            Err(e) => {
                self.state = ManagerState::Uninitialized;
                Err(e)
            }
        }
    }

    /// Drop the generation and refuse further rebuilds
    pub fn release(&mut self) {
        self.current = None;
        self.pending.clear();
        self.cursor.reset(0);
        self.ownership.reset(0);
        self.state = ManagerState::Released;
    }

    /// Lifecycle state
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Number of completed rebuilds
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The live generation
    pub fn current(&self) -> Option<&G> {
        self.current.as_ref()
    }

    /// Frame cursor
    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    /// Image acquired but not yet presented
    pub fn pending_image(&self) -> Option<u32> {
        self.pending.get()
    }

    fn require_current(&self, action: &str) -> VulkanResult<&G> {
        self.current.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("{} while {:?}", action, self.state),
        })
    }
}

fn missing(what: &str, index: usize) -> VulkanError {
    VulkanError::InvalidOperation {
        reason: format!("no {} for index {}", what, index),
    }
}

/// Owns the swapchain generation and drives acquire/present
pub struct SwapchainManager {
    slot: SwapchainSlot<SwapchainFrames>,
    device: Device,
    loader: SwapchainLoader,
    factory: DeviceSyncFactory,
    physical_device: vk::PhysicalDevice,
    pipeline_layout: vk::PipelineLayout,
    shaders: PipelineShaders,
}

impl SwapchainManager {
    /// Create a manager with no swapchain; call [`SwapchainManager::resize`] before drawing
    ///
    /// `command_pool` and `pipeline_layout` must outlive the manager.
    pub fn new(
        device: Device,
        loader: SwapchainLoader,
        physical_device: vk::PhysicalDevice,
        command_pool: vk::CommandPool,
        pipeline_layout: vk::PipelineLayout,
        shaders: PipelineShaders,
    ) -> Self {
        Self {
            slot: SwapchainSlot::new(),
            factory: DeviceSyncFactory::new(device.clone(), command_pool),
            device,
            loader,
            physical_device,
            pipeline_layout,
            shaders,
        }
    }

    /// (Re)build the swapchain for the window's current drawable size
    ///
    /// Blocks while the window is minimized. The previous generation is retired through
    /// `old_swapchain` and destroyed before the new per-image objects are created.
    pub fn resize<P: EventPump + ?Sized>(&mut self, surface: &Surface, pump: &mut P) -> VulkanResult<()> {
        if self.slot.state == ManagerState::Released {
            return Err(VulkanError::InvalidOperation {
                reason: "resize after release".to_string(),
            });
        }

        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api)? };

        let framebuffer_size = wait_for_drawable_size(pump);

        let (device, loader, factory, shaders) = (&self.device, &self.loader, &self.factory, &self.shaders);
        let (physical_device, pipeline_layout) = (self.physical_device, self.pipeline_layout);
        let slot = &mut self.slot;

        let rebuilt = slot.rebuild(|old| {
            let old_handle = old.as_ref().map_or(vk::SwapchainKHR::null(), |f| f.swapchain.handle());
            let swapchain = Swapchain::new(loader.clone(), surface, physical_device, framebuffer_size, old_handle);
            drop(old);
            SwapchainFrames::build(device, factory, swapchain?, pipeline_layout, shaders)
        });

        match &rebuilt {
            Ok(()) => log::debug!(
                "Swapchain generation {} ready with {} images",
                slot.generation,
                slot.cursor.count()
            ),
            Err(e) => log::warn!("Swapchain rebuild failed: {}", e),
        }
        rebuilt
    }

    /// Wait for the current group, acquire an image and take ownership of its command buffer
    ///
    /// Fails without waiting if the previous image has not been presented yet.
    pub fn acquire(&mut self) -> VulkanResult<AcquireOutcome> {
        let slot = &mut self.slot;
        slot.pending.ensure_free()?;
        let frames = slot.current.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("acquire while {:?}", slot.state),
        })?;
        let group = slot.cursor.current();

        let fence = frames.sync.fence(group).ok_or_else(|| missing("fence", group))?;
        fence.wait(FENCE_TIMEOUT)?;

        let acquire_semaphore = frames.sync.acquire_semaphore(group).ok_or_else(|| missing("acquire semaphore", group))?;
        let outcome = AcquireOutcome::classify(
            frames.swapchain.acquire_next_image(FENCE_TIMEOUT, acquire_semaphore.handle()),
        )?;

        if let AcquireOutcome::Acquired(image_index) = outcome {
            if let Some(previous) = slot.ownership.claim(image_index as usize, group)? {
                let other = frames.sync.fence(previous).ok_or_else(|| missing("fence", previous))?;
                other.wait(FENCE_TIMEOUT)?;
            }
            fence.reset()?;
            slot.pending.set(image_index)?;
        }

        Ok(outcome)
    }

    /// Record the pending image's command buffer: clear, then draw the quad if a set is given
    pub fn record(&self, descriptor_set: Option<vk::DescriptorSet>) -> VulkanResult<()> {
        let frames = self.slot.require_current("record")?;
        let image_index = self.slot.pending.require("record")? as usize;

        let command_buffer = frames.sync.command_buffer(image_index).ok_or_else(|| missing("command buffer", image_index))?;
        let framebuffer = frames.framebuffers.get(image_index).ok_or_else(|| missing("framebuffer", image_index))?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: CLEAR_COLOR },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: frames.extent(),
        };

        let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
        recorder.begin(vk::CommandBufferUsageFlags::empty())?;
        {
            let mut pass = recorder.begin_render_pass(
                frames.render_pass.handle(),
                framebuffer.handle(),
                render_area,
                &clear_values,
            )?;
            if let Some(set) = descriptor_set {
                pass.bind_pipeline(frames.pipeline.handle());
                pass.bind_descriptor_sets(self.pipeline_layout, &[set]);
                pass.draw(QUAD_VERTEX_COUNT, 1);
            }
        }
        recorder.end()?;
        Ok(())
    }

    /// Submit the pending image's command buffer and present it
    ///
    /// The cursor advances only when presentation succeeds; a stale swapchain is
    /// reported to the caller, which rebuilds it.
    pub fn submit_and_present(&mut self, queue: vk::Queue) -> VulkanResult<PresentOutcome> {
        let slot = &mut self.slot;
        let frames = slot.require_current("present")?;
        let image_index = slot.pending.require("present")?;
        let group = slot.cursor.current();

        let command_buffer = frames
            .sync
            .command_buffer(image_index as usize)
            .ok_or_else(|| missing("command buffer", image_index as usize))?;
        let acquire_semaphore = frames.sync.acquire_semaphore(group).ok_or_else(|| missing("acquire semaphore", group))?;
        let present_semaphore = frames.sync.present_semaphore(group).ok_or_else(|| missing("present semaphore", group))?;
        let fence = frames.sync.fence(group).ok_or_else(|| missing("fence", group))?;

        let wait_semaphores = [acquire_semaphore.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [present_semaphore.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], fence.handle())
                .map_err(VulkanError::Api)?;
        }

        let outcome = PresentOutcome::classify(
            frames.swapchain.present(queue, image_index, present_semaphore.handle()),
        )?;

        slot.pending.clear();
        if outcome == PresentOutcome::Presented {
            slot.cursor.advance();
        }
        Ok(outcome)
    }

    /// Destroy the current generation; idempotent
    pub fn release(&mut self) {
        if self.slot.state == ManagerState::Released {
            return;
        }
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        self.slot.release();
        log::debug!("Swapchain manager released");
    }

    /// Lifecycle state
    pub fn state(&self) -> ManagerState {
        self.slot.state()
    }

    /// Number of completed resizes
    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }

    /// Current swapchain image count (0 before the first resize)
    pub fn image_count(&self) -> usize {
        self.slot.current().map_or(0, SwapchainFrames::image_count)
    }

    /// Current swapchain extent
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.slot.current().map(SwapchainFrames::extent)
    }

    /// Current swapchain generation's objects
    pub fn current_frames(&self) -> Option<&SwapchainFrames> {
        self.slot.current()
    }

    /// Frame cursor
    pub fn cursor(&self) -> FrameCursor {
        self.slot.cursor()
    }

    /// Image acquired by the last successful [`SwapchainManager::acquire`], not yet presented
    pub fn pending_image(&self) -> Option<u32> {
        self.slot.pending_image()
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::sync::tests::CountingFactory;

    struct CountedGeneration {
        sync: PerImageSync<CountingFactory>,
    }

    impl SwapchainGeneration for CountedGeneration {
        fn image_count(&self) -> usize {
            self.sync.len()
        }
    }

    fn generation(factory: &CountingFactory, count: usize) -> VulkanResult<CountedGeneration> {
        Ok(CountedGeneration {
            sync: PerImageSync::new(factory, count)?,
        })
    }

    #[test]
    fn test_new_slot_is_uninitialized() {
        let slot = SwapchainSlot::<CountedGeneration>::new();
        assert_eq!(slot.state(), ManagerState::Uninitialized);
        assert_eq!(slot.generation(), 0);
        assert!(slot.current().is_none());
        assert!(matches!(slot.require_current("acquire"), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_rebuilds_leave_only_newest_generation_alive() {
        let factory = CountingFactory::default();
        let mut slot = SwapchainSlot::new();

        for (built, count) in [3, 2, 4, 4, 1, 3].into_iter().enumerate() {
            slot.rebuild(|old| {
                drop(old);
                assert_eq!(factory.live(), (0, 0, 0));
                generation(&factory, count)
            })
            .unwrap();

            assert_eq!(slot.state(), ManagerState::Ready);
            assert_eq!(slot.generation(), built as u64 + 1);
            assert_eq!(slot.cursor().count(), count);
            assert_eq!(slot.cursor().current(), 0);
            assert_eq!(factory.live(), (2 * count, count, count));
        }
    }

    #[test]
    fn test_rebuild_hands_over_previous_generation() {
        let factory = CountingFactory::default();
        let mut slot = SwapchainSlot::new();

        slot.rebuild(|old| {
            assert!(old.is_none());
            generation(&factory, 2)
        })
        .unwrap();
        slot.rebuild(|old| {
            assert_eq!(old.as_ref().map(SwapchainGeneration::image_count), Some(2));
            generation(&factory, 3)
        })
        .unwrap();

        // The old generation lived until the closure returned
        assert_eq!(factory.live(), (6, 3, 3));
    }

    #[test]
    fn test_rebuild_forgets_pending_image_and_owners() {
        let factory = CountingFactory::default();
        let mut slot = SwapchainSlot::new();
        slot.rebuild(|_| generation(&factory, 3)).unwrap();

        slot.pending.set(2).unwrap();
        slot.ownership.claim(2, 0).unwrap();
        slot.cursor.advance();

        slot.rebuild(|_| generation(&factory, 3)).unwrap();
        assert_eq!(slot.pending_image(), None);
        assert_eq!(slot.ownership.owner(2), None);
        assert_eq!(slot.cursor().current(), 0);
    }

    #[test]
    fn test_failed_rebuild_leaves_slot_uninitialized() {
        let factory = CountingFactory::default();
        let mut slot = SwapchainSlot::new();
        slot.rebuild(|_| generation(&factory, 3)).unwrap();

        factory.counters.fail_allocation.set(true);
        let result = slot.rebuild(|old| {
            drop(old);
            generation(&factory, 2)
        });

        assert!(result.is_err());
        assert_eq!(slot.state(), ManagerState::Uninitialized);
        assert!(slot.current().is_none());
        assert_eq!(slot.generation(), 1);
        assert_eq!(slot.cursor().count(), 0);
        assert_eq!(factory.live(), (0, 0, 0));

        factory.counters.fail_allocation.set(false);
        slot.rebuild(|old| {
            assert!(old.is_none());
            generation(&factory, 2)
        })
        .unwrap();
        assert_eq!(slot.state(), ManagerState::Ready);
        assert_eq!(slot.generation(), 2);
        assert_eq!(factory.live(), (4, 2, 2));
    }

    #[test]
    fn test_release_drops_generation_and_blocks_rebuild() {
        let factory = CountingFactory::default();
        let mut slot = SwapchainSlot::new();
        slot.rebuild(|_| generation(&factory, 4)).unwrap();
        slot.pending.set(1).unwrap();

        slot.release();
        assert_eq!(slot.state(), ManagerState::Released);
        assert_eq!(slot.pending_image(), None);
        assert_eq!(factory.live(), (0, 0, 0));

        let mut called = false;
        let result = slot.rebuild(|_| {
            called = true;
            generation(&factory, 4)
        });
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
        assert!(!called);
        assert_eq!(slot.state(), ManagerState::Released);
        assert_eq!(factory.live(), (0, 0, 0));
    }

    #[test]
    fn test_dropping_slot_frees_generation() {
        let factory = CountingFactory::default();
        let mut slot = SwapchainSlot::new();
        slot.rebuild(|_| generation(&factory, 3)).unwrap();
        assert_eq!(factory.live(), (6, 3, 3));

        drop(slot);
        assert_eq!(factory.live(), (0, 0, 0));
    }
}
