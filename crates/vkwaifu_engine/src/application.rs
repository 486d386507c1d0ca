//! Top-level run loop

use std::path::Path;
use thiserror::Error;
use crate::assets::{AssetError, ImageData};
use crate::core::config::PresenterConfig;
use crate::render::backends::vulkan::{FrameStatus, Presenter, TimeUniform, VulkanError};

/// Everything `run` can fail with
#[derive(Error, Debug)]
pub enum AppError {
    /// The image could not be loaded; no GPU objects were created
    #[error("Image loading failed: {0}")]
    Asset(#[from] AssetError),

    /// Setup or rendering failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// The configuration was rejected before any GPU work
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AppError {
    /// Process exit code: 1 for load and setup failures, 3 for fatal runtime faults
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Vulkan(e) if e.is_fatal() => 3,
            Self::Asset(_) | Self::Vulkan(_) | Self::Config(_) => 1,
        }
    }

    /// Whether this is a fatal runtime fault rather than a setup failure
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Vulkan(e) if e.is_fatal())
    }
}

/// Load `image_path` and present it until the window closes
///
/// The image is decoded before anything else, so a bad path never touches the GPU.
pub fn run(config: &PresenterConfig, image_path: impl AsRef<Path>) -> Result<(), AppError> {
    let image = ImageData::from_file(image_path)?;

    config.validate().map_err(AppError::Config)?;

    let mut presenter = Presenter::initialize(config, image.width, image.height)?;
    presenter.upload_texture(&image)?;
    presenter.resize()?;

    let result = frame_loop(&mut presenter, config.time_step);
    presenter.release();
    result.map_err(AppError::from)
}

fn frame_loop(presenter: &mut Presenter, time_step: f32) -> Result<(), VulkanError> {
    let mut uniform = TimeUniform::default();
    let mut frames: u64 = 0;

    while !presenter.should_close() {
        presenter.poll_events();
        uniform.time += time_step;

        match presenter.update()? {
            FrameStatus::Ready { .. } => {
                presenter.update_uniform(&uniform)?;
                presenter.draw()?;
                presenter.present()?;
                frames += 1;
            }
            FrameStatus::Skipped => {}
        }
    }

    log::info!("Window closed after {} frames", frames);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_exit_codes() {
        let missing = AppError::from(AssetError::NotFound("x.png".to_string()));
        assert_eq!(missing.exit_code(), 1);
        assert!(!missing.is_fatal());

        assert_eq!(AppError::from(VulkanError::NoDiscreteGpu).exit_code(), 1);
        assert_eq!(AppError::Config("bad".to_string()).exit_code(), 1);

        let lost = AppError::from(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(lost.exit_code(), 3);
        assert!(lost.is_fatal());
    }

    #[test]
    fn test_missing_image_fails_before_gpu() {
        let err = run(&PresenterConfig::default(), "definitely/not/here.png").unwrap_err();
        assert!(matches!(err, AppError::Asset(AssetError::NotFound(_))));
    }
}
