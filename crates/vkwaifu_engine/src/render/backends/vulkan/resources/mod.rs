//! GPU resources: buffers, images, the sampled texture and descriptors

pub mod buffer;
pub mod descriptor_set;
pub mod image;
pub mod texture;

pub use buffer::{Buffer, UniformBuffer};
pub use descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetWriter};
pub use image::{Image, LayoutTransition};
pub use texture::Texture;
