//! Command recording, render pass, framebuffers and the graphics pipeline

pub mod commands;
pub mod framebuffer;
pub mod render_pass;
pub mod shader;

pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use framebuffer::Framebuffer;
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, PipelineLayout, PipelineShaders, ShaderModule};
