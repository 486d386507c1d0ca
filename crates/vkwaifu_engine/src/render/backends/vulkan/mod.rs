//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules, tied
//! together by [`Presenter`].

/// Window, instance, surface and logical device
pub mod initialization;

/// Buffers, images, the texture and descriptors
pub mod resources;

/// Commands, render pass, framebuffers and the pipeline
pub mod rendering;

/// Swapchain lifecycle and frame synchronization
pub mod state;

/// The presenter that owns everything above
pub mod renderer;

pub use renderer::{Presenter, TimeUniform};

pub use initialization::context::{DeviceContext, PhysicalDeviceInfo, VulkanError, VulkanInstance, VulkanResult};
pub use initialization::surface::Surface;
pub use initialization::window::{EventPump, Window, WindowError};

pub use resources::{Buffer, Texture, UniformBuffer};
pub use rendering::{CommandPool, GraphicsPipeline, RenderPass};

pub use state::{FrameStatus, SwapchainManager};
