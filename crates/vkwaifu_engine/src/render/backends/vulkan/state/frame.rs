//! Frame bookkeeping for the acquire -> record -> submit -> present loop
//!
//! `current` (the synchronization group) and `image_index` (the image the presentation
//! engine returned) are independent: groups cycle round-robin, images come back in
//! whatever order the engine chooses.

use ash::{prelude::VkResult, vk};
use crate::render::backends::vulkan::{VulkanResult, VulkanError};

/// Outcome of [`crate::Presenter::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// An image was acquired; record into and draw to `image_index`
    Ready {
        /// Swapchain image to render into
        image_index: u32,
    },
    /// The swapchain was stale and has been rebuilt; nothing to draw this iteration
    Skipped,
}

/// Round-robin index of the synchronization group in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCursor {
    current: usize,
    count: usize,
}

impl FrameCursor {
    /// Start at group 0 of `count`
    pub fn new(count: usize) -> Self {
        Self { current: 0, count }
    }

    /// Restart at group 0 for a new group count
    pub fn reset(&mut self, count: usize) {
        *self = Self::new(count);
    }

    /// Group used by the frame in progress
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of groups
    pub fn count(&self) -> usize {
        self.count
    }

    /// Move to the next group, wrapping at `count`
    pub fn advance(&mut self) {
        if self.count > 0 {
            self.current = (self.current + 1) % self.count;
        }
    }
}

/// Which group last submitted work using each swapchain image's command buffer
#[derive(Debug, Clone, Default)]
pub struct ImageOwnership {
    owners: Vec<Option<usize>>,
}

impl ImageOwnership {
    /// No image owned yet
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Forget all owners and resize for a new swapchain
    pub fn reset(&mut self, image_count: usize) {
        *self = Self::new(image_count);
    }

    /// Record that `group` is about to use `image_index`
    ///
    /// Returns the previous owner when it is a different group; the caller must wait on
    /// that group's fence before re-recording the image's command buffer.
    pub fn claim(&mut self, image_index: usize, group: usize) -> VulkanResult<Option<usize>> {
        let image_count = self.owners.len();
        let slot = self.owners.get_mut(image_index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("image index {} out of range for {} images", image_index, image_count),
        })?;
        let previous = slot.replace(group);
        Ok(previous.filter(|&owner| owner != group))
    }

    /// Current owner of `image_index`
    pub fn owner(&self, image_index: usize) -> Option<usize> {
        self.owners.get(image_index).copied().flatten()
    }
}

/// Image acquired but not yet presented; at most one at a time
///
/// A second acquire before present would wait on a fence that nothing will signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingImage(Option<u32>);

impl PendingImage {
    /// Fail if an image is still waiting to be presented
    pub fn ensure_free(&self) -> VulkanResult<()> {
        match self.0 {
            Some(image_index) => Err(VulkanError::InvalidOperation {
                reason: format!("image {} acquired but not yet presented", image_index),
            }),
            None => Ok(()),
        }
    }

    /// Mark `image_index` as acquired
    pub fn set(&mut self, image_index: u32) -> VulkanResult<()> {
        self.ensure_free()?;
        self.0 = Some(image_index);
        Ok(())
    }

    /// The acquired image, if any
    pub fn get(&self) -> Option<u32> {
        self.0
    }

    /// The acquired image, or an error naming `action`
    pub fn require(&self, action: &str) -> VulkanResult<u32> {
        self.0.ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("{} without an acquired image", action),
        })
    }

    /// Forget the acquired image
    pub fn clear(&mut self) {
        self.0 = None;
    }
}

/// Result of `vkAcquireNextImageKHR` as the loop sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Usable image
    Acquired(u32),
    /// Out of date or suboptimal; rebuild and skip the frame
    Stale,
}

impl AcquireOutcome {
    /// Classify an acquire result; anything but success/suboptimal/out-of-date is fatal
    pub fn classify(result: VkResult<(u32, bool)>) -> VulkanResult<Self> {
        match result {
            Ok((image_index, false)) => Ok(Self::Acquired(image_index)),
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::Stale),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }
}

/// Result of `vkQueuePresentKHR` as the loop sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Image queued for display
    Presented,
    /// Out of date or suboptimal; rebuild
    Stale,
}

impl PresentOutcome {
    /// Classify a present result; anything but success/suboptimal/out-of-date is fatal
    pub fn classify(result: VkResult<bool>) -> VulkanResult<Self> {
        match result {
            Ok(false) => Ok(Self::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::Stale),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }
}
