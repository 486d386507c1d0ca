//! Vulkan swapchain management
//!
//! Handles swapchain creation and the views of its images. The selection rules are plain
//! functions over the surface's reported support.

use ash::{vk, Device};
use ash::extensions::khr::Swapchain as SwapchainLoader;
use crate::core::config::{PRESENT_MODE, SURFACE_COLOR_SPACE, SURFACE_FORMAT};
use crate::render::backends::vulkan::{VulkanResult, VulkanError};
use crate::render::backends::vulkan::initialization::Surface;
use crate::render::backends::vulkan::resources::image::create_color_view;

/// The configured surface format, if the surface offers it
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|sf| sf.format == SURFACE_FORMAT && sf.color_space == SURFACE_COLOR_SPACE)
        .ok_or(VulkanError::SurfaceFormatUnavailable {
            format: SURFACE_FORMAT,
            color_space: SURFACE_COLOR_SPACE,
        })
}

/// The configured present mode, if the surface offers it
pub fn select_present_mode(available: &[vk::PresentModeKHR]) -> VulkanResult<vk::PresentModeKHR> {
    available
        .iter()
        .copied()
        .find(|&mode| mode == PRESENT_MODE)
        .ok_or(VulkanError::PresentModeUnavailable(PRESENT_MODE))
}

/// Surface extent, or the framebuffer size clamped to the limits when the surface leaves it open
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer.0.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer.1.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum when the surface has one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Swapchain handle and its images (owned by the presentation engine)
pub struct Swapchain {
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the surface, retiring `old_swapchain` if given
    pub fn new(
        loader: SwapchainLoader,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
        framebuffer: (u32, u32),
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let caps = surface.capabilities(physical_device)?;
        let format = select_surface_format(&surface.formats(physical_device)?)?;
        let present_mode = select_present_mode(&surface.present_modes(physical_device)?)?;
        let extent = choose_extent(&caps, framebuffer);
        let min_image_count = choose_image_count(&caps);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            loader.create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        log::info!(
            "Created swapchain {}x{} with {} images (requested at least {})",
            extent.width,
            extent.height,
            images.len(),
            min_image_count
        );

        Ok(Self {
            loader,
            swapchain,
            images,
            format,
            extent,
        })
    }

    /// Acquire the next image, signalling `semaphore`
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> ash::prelude::VkResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    /// Queue `image_index` for presentation once `wait` is signalled
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> ash::prelude::VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    /// Get the swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get the presentable images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Get the surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Get the image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("Destroyed swapchain with {} images", self.images.len());
    }
}

/// One color view per swapchain image
pub struct SwapchainImageViews {
    device: Device,
    views: Vec<vk::ImageView>,
}

impl SwapchainImageViews {
    /// Create views for every image of `swapchain`
    pub fn new(device: Device, swapchain: &Swapchain) -> VulkanResult<Self> {
        let mut views = Self {
            device,
            views: Vec::with_capacity(swapchain.image_count()),
        };
        for &image in swapchain.images() {
            // Already-created views are destroyed by Drop on error
            let view = create_color_view(&views.device, image, swapchain.format().format)?;
            views.views.push(view);
        }
        Ok(views)
    }

    /// Get the views, indexed like the swapchain images
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }
}

impl Drop for SwapchainImageViews {
    fn drop(&mut self) {
        for &view in &self.views {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_surface_format_exact_match_only() {
        let available = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&available).unwrap(), available[1]);

        let unusable = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert!(matches!(
            select_surface_format(&unusable),
            Err(VulkanError::SurfaceFormatUnavailable { .. })
        ));
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn test_present_mode_is_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&modes).unwrap(), vk::PresentModeKHR::FIFO);
        assert!(matches!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            Err(VulkanError::PresentModeUnavailable(vk::PresentModeKHR::FIFO))
        ));
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let extent = choose_extent(&caps(2, 3, (800, 600)), (1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_framebuffer_when_undefined() {
        let c = caps(2, 3, (u32::MAX, u32::MAX));
        let extent = choose_extent(&c, (8000, 8));
        assert_eq!((extent.width, extent.height), (4096, 16));

        let extent = choose_extent(&c, (1280, 720));
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps(2, 0, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(2, 8, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(3, 3, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(1, 2, (1, 1))), 2);
    }
}
