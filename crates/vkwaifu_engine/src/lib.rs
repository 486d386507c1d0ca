//! # vkwaifu engine
//!
//! Displays one image full-screen through a fixed Vulkan pipeline and keeps re-presenting
//! it while a time uniform animates the sampling coordinates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vkwaifu_engine::{run, PresenterConfig};
//!
//! fn main() -> Result<(), vkwaifu_engine::AppError> {
//!     vkwaifu_engine::foundation::logging::init();
//!     run(&PresenterConfig::default(), "waifu.png")
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod core;
pub mod assets;
pub mod render;

mod application;

pub use application::{run, AppError};
pub use crate::core::config::{PresenterConfig, ShaderConfig};
pub use assets::{AssetError, ImageData};
pub use render::backends::vulkan::{FrameStatus, Presenter, TimeUniform, VulkanError, VulkanResult};
