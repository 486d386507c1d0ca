//! Vulkan texture upload
//!
//! One synchronous staging copy: the pixels go into a host-visible buffer, a single-use
//! command buffer on the graphics queue moves them into a device-local image, and the
//! image ends in `SHADER_READ_ONLY_OPTIMAL`. The texture is immutable afterwards.

use ash::{vk, Device};
use crate::assets::ImageData;
use crate::core::config::TEXTURE_FORMAT;
use crate::render::backends::vulkan::{VulkanResult, VulkanError};
use crate::render::backends::vulkan::initialization::DeviceContext;
use super::buffer::Buffer;
use super::image::Image;

/// Sampled texture: image, view and sampler
///
/// Sampler and view are destroyed before the image they refer to.
pub struct Texture {
    device: Device,
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image: Image,
}

impl Texture {
    /// Upload RGBA8 pixels and create the view and sampler
    pub fn upload(
        context: &DeviceContext,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        image_data: &ImageData,
    ) -> VulkanResult<Self> {
        let (width, height) = (image_data.width, image_data.height);
        let expected = ImageData::expected_len(width, height);
        if width == 0 || height == 0 || image_data.data.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "texture {}x{} needs {} bytes of RGBA8, got {}",
                    width,
                    height,
                    expected,
                    image_data.data.len()
                ),
            });
        }

        let device = context.device().clone();

        let staging = Buffer::new(
            device.clone(),
            memory_properties,
            expected as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &[],
        )?;
        staging.write_bytes(&image_data.data)?;

        let image = Image::new(
            device.clone(),
            memory_properties,
            width,
            height,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let pool = context.graphics_pool();
        let mut recorder = pool.begin_single_time()?;
        let recorded = recorder
            .transition_image_layout(
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )
            .and_then(|()| recorder.copy_buffer_to_image(staging.handle(), image.handle(), width, height))
            .and_then(|()| {
                recorder.transition_image_layout(
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            });
        if let Err(e) = recorded {
            pool.free_command_buffers(&[recorder.handle()]);
            return Err(e);
        }
        pool.end_single_time(recorder, context.graphics_queue())?;

        // The copy has completed, so the staging memory can go now
        drop(staging);

        let image_view = image.create_view()?;

        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(16.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = match unsafe { device.create_sampler(&sampler_create_info, None) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { device.destroy_image_view(image_view, None) };
                return Err(VulkanError::Api(e));
            }
        };

        log::info!("Uploaded {}x{} texture ({:?})", width, height, TEXTURE_FORMAT);

        Ok(Self {
            device,
            sampler,
            image_view,
            image,
        })
    }

    /// Descriptor info for sampling in `SHADER_READ_ONLY_OPTIMAL`
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Get the texture extent
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    /// Get the texture format
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Get the image view
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Get the sampler
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.image_view, None);
        }
    }
}
