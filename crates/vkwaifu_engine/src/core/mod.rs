//! # Core
//!
//! Configuration shared by the presenter and the binary.

pub mod config;

pub use config::{PresenterConfig, ShaderConfig};
