//! The presenter: one window, one texture, one animated uniform
//!
//! `Presenter` owns every Vulkan object. Callers drive it with the
//! `update` -> `update_uniform` -> `draw` -> `present` sequence once per iteration.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use crate::assets::ImageData;
use crate::core::config::PresenterConfig;
use super::{VulkanError, VulkanResult};
use super::initialization::{DeviceContext, EventPump, PhysicalDeviceInfo, Surface, VulkanInstance, Window};
use super::rendering::{PipelineLayout, PipelineShaders};
use super::resources::descriptor_set::{presenter_layout_builder, SAMPLER_BINDING, UNIFORM_BINDING};
use super::resources::{DescriptorPool, DescriptorSetLayout, DescriptorSetWriter, Texture, UniformBuffer};
use super::state::frame::{AcquireOutcome, FrameStatus, PresentOutcome};
use super::state::SwapchainManager;

/// Per-frame uniform read by the vertex shader at binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TimeUniform {
    /// Animation time, advanced by the caller each iteration
    pub time: f32,
}

impl TimeUniform {
    /// Uniform holding `time`
    pub fn new(time: f32) -> Self {
        Self { time }
    }
}

// Field order is teardown order
struct GpuResources {
    swapchain: SwapchainManager,
    descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    texture: Option<Texture>,
    uniform: UniformBuffer<TimeUniform>,
    pipeline_layout: PipelineLayout,
    descriptor_layout: DescriptorSetLayout,
    context: DeviceContext,
    physical: PhysicalDeviceInfo,
    surface: Surface,
    instance: VulkanInstance,
}

/// Full-screen image presenter
pub struct Presenter {
    gpu: Option<GpuResources>,
    window: Window,
}

impl Presenter {
    /// Open a `width` x `height` window and build everything up to (not including) the swapchain
    ///
    /// Call [`Presenter::upload_texture`] and then [`Presenter::resize`] before the first frame.
    pub fn initialize(config: &PresenterConfig, width: u32, height: u32) -> VulkanResult<Self> {
        config.validate().map_err(VulkanError::InitializationFailed)?;

        let window = Window::new(&config.window_title, width, height)?;
        let instance = VulkanInstance::new(&window, &config.application_name, config.validation_enabled())?;
        let physical = PhysicalDeviceInfo::select_discrete(&instance.instance)?;
        let context = DeviceContext::new(&instance.instance, &physical)?;

        let surface = Surface::new(&instance, &window)?;
        physical.require_present_support(&surface)?;

        let device = context.device().clone();
        let descriptor_layout = presenter_layout_builder().build(&device)?;
        let pipeline_layout = PipelineLayout::new(device.clone(), &[descriptor_layout.handle()])?;

        let uniform = UniformBuffer::<TimeUniform>::new(device.clone(), &physical.memory_properties)?;
        uniform.update(&TimeUniform::default())?;

        let descriptor_pool = DescriptorPool::for_layout(device.clone(), &descriptor_layout, 1)?;
        let descriptor_set = descriptor_pool.allocate(&descriptor_layout)?;

        let shaders = match &config.shaders {
            Some(files) => PipelineShaders::load(&files.vertex_shader_path, &files.fragment_shader_path)?,
            None => PipelineShaders::embedded()?,
        };

        let swapchain = SwapchainManager::new(
            device,
            context.swapchain_loader().clone(),
            physical.device,
            context.graphics_pool().handle(),
            pipeline_layout.handle(),
            shaders,
        );

        log::info!("Presenter initialized ({}x{} window)", width, height);

        Ok(Self {
            gpu: Some(GpuResources {
                swapchain,
                descriptor_pool,
                descriptor_set,
                texture: None,
                uniform,
                pipeline_layout,
                descriptor_layout,
                context,
                physical,
                surface,
                instance,
            }),
            window,
        })
    }

    fn gpu(&self) -> VulkanResult<&GpuResources> {
        self.gpu.as_ref().ok_or_else(released)
    }

    /// Upload the image and point the descriptor set at it and the uniform; allowed once
    pub fn upload_texture(&mut self, image: &ImageData) -> VulkanResult<()> {
        let gpu = self.gpu.as_mut().ok_or_else(released)?;
        if gpu.texture.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "texture already uploaded".to_string(),
            });
        }

        let texture = Texture::upload(&gpu.context, &gpu.physical.memory_properties, image)?;

        DescriptorSetWriter::new(gpu.descriptor_set)
            .write_uniform_buffer(UNIFORM_BINDING, gpu.uniform.descriptor_info())
            .write_combined_image_sampler(SAMPLER_BINDING, texture.descriptor_info())
            .update(gpu.context.device());

        gpu.texture = Some(texture);
        Ok(())
    }

    /// Rebuild the swapchain for the window's current size, waiting out minimization
    pub fn resize(&mut self) -> VulkanResult<()> {
        let Self { gpu, window } = self;
        let gpu = gpu.as_mut().ok_or_else(released)?;
        gpu.swapchain.resize(&gpu.surface, window)
    }

    /// Acquire the next image
    ///
    /// A stale swapchain is rebuilt on the spot and the frame reported as skipped.
    pub fn update(&mut self) -> VulkanResult<FrameStatus> {
        let Self { gpu, window } = self;
        let gpu = gpu.as_mut().ok_or_else(released)?;

        match gpu.swapchain.acquire()? {
            AcquireOutcome::Acquired(image_index) => Ok(FrameStatus::Ready { image_index }),
            AcquireOutcome::Stale => {
                log::debug!("Swapchain stale on acquire, rebuilding");
                gpu.context.wait_idle()?;
                gpu.swapchain.resize(&gpu.surface, window)?;
                Ok(FrameStatus::Skipped)
            }
        }
    }

    /// Write the uniform read by the next submission
    pub fn update_uniform(&self, value: &TimeUniform) -> VulkanResult<()> {
        self.gpu()?.uniform.update(value)
    }

    /// Read the uniform back through its mapping
    pub fn read_uniform(&self) -> VulkanResult<TimeUniform> {
        self.gpu()?.uniform.read()
    }

    /// Record the full-screen quad into the acquired image's command buffer
    pub fn draw(&self) -> VulkanResult<()> {
        let gpu = self.gpu()?;
        if gpu.texture.is_none() {
            return Err(VulkanError::InvalidOperation {
                reason: "draw before texture upload".to_string(),
            });
        }
        gpu.swapchain.record(Some(gpu.descriptor_set))
    }

    /// Record a pass that only clears the acquired image
    pub fn clear_current_image(&self) -> VulkanResult<()> {
        self.gpu()?.swapchain.record(None)
    }

    /// Submit the recorded frame and present it
    pub fn present(&mut self) -> VulkanResult<()> {
        let Self { gpu, window } = self;
        let gpu = gpu.as_mut().ok_or_else(released)?;

        if gpu.swapchain.submit_and_present(gpu.context.graphics_queue())? == PresentOutcome::Stale {
            log::debug!("Swapchain stale on present, rebuilding");
            gpu.context.wait_idle()?;
            gpu.swapchain.resize(&gpu.surface, window)?;
        }
        Ok(())
    }

    /// Pump window events without blocking
    pub fn poll_events(&mut self) {
        self.window.poll_events();
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Ask the loop to stop at the next check
    pub fn request_close(&mut self) {
        self.window.set_should_close(true);
    }

    /// Idle the device and destroy every GPU object; idempotent
    pub fn release(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            if let Err(e) = gpu.context.wait_idle() {
                log::warn!("Device wait failed during release: {}", e);
            }
            gpu.swapchain.release();
            drop(gpu);
            log::debug!("Presenter released");
        }
    }

    /// Whether [`Presenter::release`] has run
    pub fn is_released(&self) -> bool {
        self.gpu.is_none()
    }

    /// Current swapchain image count
    pub fn image_count(&self) -> usize {
        self.gpu.as_ref().map_or(0, |gpu| gpu.swapchain.image_count())
    }

    /// Current swapchain extent
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.gpu.as_ref().and_then(|gpu| gpu.swapchain.extent())
    }

    /// Extent of the uploaded texture
    pub fn texture_extent(&self) -> Option<vk::Extent2D> {
        self.gpu.as_ref()?.texture.as_ref().map(Texture::extent)
    }

    /// Format of the uploaded texture
    pub fn texture_format(&self) -> Option<vk::Format> {
        self.gpu.as_ref()?.texture.as_ref().map(Texture::format)
    }

    /// Swapchain state, for inspection
    pub fn swapchain(&self) -> Option<&SwapchainManager> {
        self.gpu.as_ref().map(|gpu| &gpu.swapchain)
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.release();
    }
}

fn released() -> VulkanError {
    VulkanError::InvalidOperation {
        reason: "presenter already released".to_string(),
    }
}
