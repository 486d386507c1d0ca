//! # Presenter Configuration
//!
//! Everything tunable at runtime lives in [`PresenterConfig`], built in code with
//! `with_*` methods. Choices that are fixed for the pipeline (surface format, present
//! mode, texture format, clear color) are compile-time constants below.
//!
//! The SPIR-V for both stages is compiled into the library; [`ShaderConfig`] only
//! overrides it with files on disk.

use ash::vk;
use std::path::{Path, PathBuf};

/// Swapchain image format
pub const SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

/// Swapchain color space
pub const SURFACE_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Presentation mode; FIFO is the only mode every implementation must support
pub const PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;

/// Format of the uploaded image texture
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Color the render pass clears to before drawing
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.5, 0.4, 1.0];

/// Timeout for every fence wait
pub const FENCE_TIMEOUT: u64 = u64::MAX;

/// Default time increment added to the uniform every frame
pub const DEFAULT_TIME_STEP: f32 = 0.002;

/// File name of the vertex stage SPIR-V
pub const VERTEX_SHADER_FILE: &str = "quad.spv";

/// File name of the fragment stage SPIR-V
pub const FRAGMENT_SHADER_FILE: &str = "image.spv";

/// # Shader Configuration
///
/// Paths of two SPIR-V files that replace the built-in shaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: PathBuf,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: PathBuf,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<PathBuf>, fragment_path: impl Into<PathBuf>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// `quad.spv` and `image.spv` inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(VERTEX_SHADER_FILE), dir.join(FRAGMENT_SHADER_FILE))
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), String> {
        if !self.vertex_shader_path.exists() {
            return Err(format!("Vertex shader not found: {}", self.vertex_shader_path.display()));
        }
        if !self.fragment_shader_path.exists() {
            return Err(format!("Fragment shader not found: {}", self.fragment_shader_path.display()));
        }
        Ok(())
    }
}

/// # Presenter Configuration
#[derive(Debug, Clone)]
pub struct PresenterConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Window title
    pub window_title: String,
    /// Whether to enable the validation layer; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Added to the time uniform once per frame
    pub time_step: f32,
    /// Shader files to use instead of the built-in SPIR-V
    pub shaders: Option<ShaderConfig>,
}

impl PresenterConfig {
    /// Create a configuration with defaults for everything but the name
    pub fn new(app_name: impl Into<String>) -> Self {
        let application_name = app_name.into();
        Self {
            window_title: application_name.clone(),
            application_name,
            enable_validation: None,
            time_step: DEFAULT_TIME_STEP,
            shaders: None,
        }
    }

    /// Set the window title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.window_title = title.into();
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the per-frame time increment
    pub fn with_time_step(mut self, step: f32) -> Self {
        self.time_step = step;
        self
    }

    /// Load the shaders from disk instead of using the built-in ones
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = Some(shaders);
        self
    }

    /// Validation is on when asked for, otherwise in debug builds only
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if !self.time_step.is_finite() {
            return Err(format!("Time step must be finite, got {}", self.time_step));
        }
        self.shaders.as_ref().map_or(Ok(()), ShaderConfig::validate)
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self::new("vkwaifu")
    }
}
