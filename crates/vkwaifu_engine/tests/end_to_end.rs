//! Whole-program checks
//!
//! Tests marked `#[ignore]` open a window and need a discrete GPU; run them with
//! `cargo test -- --ignored` on a machine with a display.

use std::path::{Path, PathBuf};

use ash::vk;
use image::{ImageFormat, Rgba, RgbaImage};
use vkwaifu_engine::core::config::TEXTURE_FORMAT;
use vkwaifu_engine::foundation::logging;
use vkwaifu_engine::{
    run, AppError, AssetError, FrameStatus, ImageData, Presenter, PresenterConfig, TimeUniform, VulkanError,
};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vkwaifu-e2e-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_checker_png(path: &Path, size: u32) {
    let img = RgbaImage::from_fn(size, size, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgba([255, 105, 180, 255])
        } else {
            Rgba([20, 20, 20, 255])
        }
    });
    img.save_with_format(path, ImageFormat::Png).unwrap();
}

// Uses the SPIR-V compiled into the library, so the working directory does not matter
fn gpu_config() -> PresenterConfig {
    PresenterConfig::new("vkwaifu-tests")
}

fn ready_presenter(image: &ImageData) -> Presenter {
    let mut presenter = Presenter::initialize(&gpu_config(), image.width, image.height).unwrap();
    presenter.upload_texture(image).unwrap();
    presenter.resize().unwrap();
    presenter
}

#[test]
fn test_missing_image_exits_with_load_failure() {
    logging::init_for_tests();

    let err = run(&PresenterConfig::default(), "no/such/waifu.png").unwrap_err();
    assert!(matches!(err, AppError::Asset(AssetError::NotFound(_))));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_undecodable_image_exits_with_load_failure() {
    logging::init_for_tests();

    let path = scratch_dir("garbage").join("broken.png");
    std::fs::write(&path, b"definitely not a png").unwrap();

    let err = run(&PresenterConfig::default(), &path).unwrap_err();
    assert!(matches!(err, AppError::Asset(AssetError::LoadFailed(_))));
    assert_ne!(err.exit_code(), 0);
}

#[test]
#[ignore = "needs a discrete GPU and a display"]
fn test_ten_frames_from_png() {
    logging::init_for_tests();

    let path = scratch_dir("frames").join("checker.png");
    write_checker_png(&path, 64);
    let image = ImageData::from_file(&path).unwrap();

    let mut presenter = ready_presenter(&image);
    let image_count = presenter.image_count();
    assert!(image_count > 0);

    let swapchain = presenter.swapchain().unwrap();
    let frames = swapchain.current_frames().unwrap();
    assert_eq!(frames.sync().len(), image_count);
    assert_eq!(frames.sync().command_buffer_count(), image_count);
    assert_eq!(frames.framebuffer_count(), image_count);
    assert!((0..image_count).all(|i| frames.sync().fence(i).unwrap().is_signaled().unwrap()));

    let mut uniform = TimeUniform::default();
    for _ in 0..10 {
        presenter.poll_events();
        uniform.time += 0.002;
        if let FrameStatus::Ready { image_index } = presenter.update().unwrap() {
            assert!((image_index as usize) < presenter.image_count());
            presenter.update_uniform(&uniform).unwrap();
            presenter.draw().unwrap();
            presenter.present().unwrap();
        }
    }

    presenter.release();
    presenter.release();
    assert!(presenter.is_released());
}

#[test]
#[ignore = "needs a discrete GPU and a display"]
fn test_uniform_round_trip() {
    logging::init_for_tests();

    let image = ImageData::solid_color(4, 4, [255, 255, 255, 255]);
    let presenter = ready_presenter(&image);

    for time in [0.0, 0.002, 1.5, -3.25] {
        presenter.update_uniform(&TimeUniform::new(time)).unwrap();
        assert_eq!(presenter.read_uniform().unwrap(), TimeUniform::new(time));
    }
}

#[test]
#[ignore = "needs a discrete GPU and a display"]
fn test_texture_matches_source_extent() {
    logging::init_for_tests();

    let image = ImageData::solid_color(37, 11, [10, 20, 30, 255]);
    let mut presenter = ready_presenter(&image);

    assert_eq!(presenter.texture_extent(), Some(vk::Extent2D { width: 37, height: 11 }));
    assert_eq!(presenter.texture_format(), Some(TEXTURE_FORMAT));

    assert!(matches!(
        presenter.upload_texture(&image),
        Err(VulkanError::InvalidOperation { .. })
    ));
}

#[test]
#[ignore = "needs a discrete GPU and a display"]
fn test_repeated_resize_keeps_counts() {
    logging::init_for_tests();

    let image = ImageData::solid_color(64, 64, [0, 0, 0, 255]);
    let mut presenter = ready_presenter(&image);
    let image_count = presenter.image_count();

    for generation in 2..6 {
        presenter.resize().unwrap();
        let swapchain = presenter.swapchain().unwrap();
        assert_eq!(swapchain.generation(), generation);
        assert_eq!(swapchain.cursor().current(), 0);

        let frames = swapchain.current_frames().unwrap();
        assert_eq!(frames.image_count(), image_count);
        assert_eq!(frames.sync().len(), image_count);
        assert_eq!(frames.sync().command_buffer_count(), image_count);
    }

    // Clearing without a draw still goes through the full submit path
    if let FrameStatus::Ready { .. } = presenter.update().unwrap() {
        presenter.clear_current_image().unwrap();
        presenter.present().unwrap();
    }
}

#[test]
#[ignore = "needs a discrete GPU and a display"]
fn test_second_update_before_present_is_rejected() {
    logging::init_for_tests();

    let image = ImageData::solid_color(16, 16, [200, 100, 50, 255]);
    let mut presenter = ready_presenter(&image);

    let mut acquired = false;
    for _ in 0..4 {
        if let FrameStatus::Ready { image_index } = presenter.update().unwrap() {
            assert!(matches!(presenter.update(), Err(VulkanError::InvalidOperation { .. })));
            assert_eq!(presenter.swapchain().unwrap().pending_image(), Some(image_index));

            presenter.draw().unwrap();
            presenter.present().unwrap();
            assert_eq!(presenter.swapchain().unwrap().pending_image(), None);
            acquired = true;
            break;
        }
    }
    assert!(acquired);
}
