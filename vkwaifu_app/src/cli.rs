use std::path::PathBuf;

use clap::Parser;
use vkwaifu_engine::core::config::DEFAULT_TIME_STEP;
use vkwaifu_engine::{PresenterConfig, ShaderConfig};

#[derive(Parser, Debug)]
#[command(
    name = "vkwaifu",
    version,
    about = "Show an image full-screen through Vulkan with an animated time uniform"
)]
pub struct Cli {
    /// Image to present (PNG or JPEG)
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Force the Vulkan validation layer on (default: on in debug builds only).
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Force the Vulkan validation layer off.
    #[arg(long)]
    pub no_validation: bool,

    /// Amount added to the time uniform every frame.
    #[arg(long, value_name = "STEP", default_value_t = DEFAULT_TIME_STEP)]
    pub time_step: f32,

    /// Window title; defaults to the image file name.
    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,

    /// Load quad.spv and image.spv from DIR instead of the built-in shaders.
    #[arg(long, value_name = "DIR")]
    pub shader_dir: Option<PathBuf>,
}

impl Cli {
    pub fn presenter_config(&self) -> PresenterConfig {
        let title = self.title.clone().unwrap_or_else(|| {
            self.image
                .file_name()
                .map_or_else(|| "vkwaifu".to_string(), |name| name.to_string_lossy().into_owned())
        });

        let mut config = PresenterConfig::default()
            .with_title(title)
            .with_time_step(self.time_step);
        if self.validation {
            config = config.with_validation(true);
        } else if self.no_validation {
            config = config.with_validation(false);
        }
        if let Some(dir) = &self.shader_dir {
            config = config.with_shaders(ShaderConfig::in_dir(dir));
        }
        config
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["vkwaifu", "art/waifu.png"]).unwrap();
        let config = cli.presenter_config();
        assert_eq!(config.window_title, "waifu.png");
        assert_eq!(config.enable_validation, None);
        assert_eq!(config.time_step, DEFAULT_TIME_STEP);
        assert!(config.shaders.is_none());
    }

    #[test]
    fn test_shader_dir_overrides_builtin_shaders() {
        let cli = Cli::try_parse_from(["vkwaifu", "--shader-dir", "/opt/shaders", "a.png"]).unwrap();
        let shaders = cli.presenter_config().shaders.unwrap();
        assert_eq!(shaders.vertex_shader_path, PathBuf::from("/opt/shaders/quad.spv"));
        assert_eq!(shaders.fragment_shader_path, PathBuf::from("/opt/shaders/image.spv"));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "vkwaifu",
            "--no-validation",
            "--time-step",
            "0.01",
            "--title",
            "hi",
            "a.png",
        ])
        .unwrap();
        let config = cli.presenter_config();
        assert_eq!(config.enable_validation, Some(false));
        assert_eq!(config.time_step, 0.01);
        assert_eq!(config.window_title, "hi");
    }

    #[test]
    fn test_image_is_required() {
        let err = Cli::try_parse_from(["vkwaifu"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_validation_flags_conflict() {
        assert!(Cli::try_parse_from(["vkwaifu", "--validation", "--no-validation", "a.png"]).is_err());
    }
}
