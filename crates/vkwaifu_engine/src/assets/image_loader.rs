//! Image loading for the presented texture
//!
//! Decodes any format the `image` crate was built with and always produces RGBA8.

use std::path::Path;
use crate::assets::AssetError;

/// Bytes per RGBA8 pixel
pub const RGBA_CHANNELS: u8 = 4;

/// Decoded image ready for GPU upload
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Raw RGBA pixel data, row-major, tightly packed
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of color channels (always 4)
    pub channels: u8,
}

impl ImageData {
    /// Load an image from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path_ref = path.as_ref();

        log::debug!("Loading image from: {:?}", path_ref);

        if !path_ref.exists() {
            return Err(AssetError::NotFound(path_ref.display().to_string()));
        }

        let img = image::open(path_ref)
            .map_err(|e| AssetError::LoadFailed(format!("{}: {}", path_ref.display(), e)))?;

        let rgba_img = img.to_rgba8();
        let (width, height) = rgba_img.dimensions();

        log::info!("Loaded image {}x{} from {:?}", width, height, path_ref);

        Self::from_rgba8(rgba_img.into_raw(), width, height)
    }

    /// Decode an image held in memory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssetError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| AssetError::LoadFailed(format!("Failed to load image from bytes: {}", e)))?;

        let rgba_img = img.to_rgba8();
        let (width, height) = rgba_img.dimensions();

        log::debug!("Loaded image {}x{} from memory", width, height);

        Self::from_rgba8(rgba_img.into_raw(), width, height)
    }

    /// Wrap an already decoded RGBA8 buffer, checking its length against the extent
    pub fn from_rgba8(data: Vec<u8>, width: u32, height: u32) -> Result<Self, AssetError> {
        let image = Self {
            data,
            width,
            height,
            channels: RGBA_CHANNELS,
        };
        image.validate()?;
        Ok(image)
    }

    /// Create a solid color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = width as usize * height as usize;
        Self {
            data: color.repeat(pixel_count),
            width,
            height,
            channels: RGBA_CHANNELS,
        }
    }

    /// Expected byte length for the extent: width * height * 4
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGBA_CHANNELS as usize
    }

    /// Get the size of the image data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Reject empty extents and buffers that don't hold exactly one RGBA8 pixel per texel
    pub fn validate(&self) -> Result<(), AssetError> {
        if self.width == 0 || self.height == 0 {
            return Err(AssetError::InvalidData(format!(
                "image has an empty extent {}x{}",
                self.width, self.height
            )));
        }
        let expected = Self::expected_len(self.width, self.height);
        if self.data.len() != expected {
            return Err(AssetError::InvalidData(format!(
                "expected {} bytes for {}x{} RGBA8, got {}",
                expected,
                self.width,
                self.height,
                self.data.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encoded_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    #[test]
    fn test_solid_color_image() {
        let img = ImageData::solid_color(4, 4, [255, 0, 0, 255]);
        assert_eq!(img.width, 4);
        assert_eq!(img.height, 4);
        assert_eq!(img.channels, 4);
        assert_eq!(img.size_bytes(), 4 * 4 * 4);
        assert_eq!(&img.data[0..4], &[255, 0, 0, 255]);
        assert!(img.validate().is_ok());
    }

    #[test]
    fn test_load_png_from_bytes() {
        let bytes = encoded_png(3, 2, [10, 20, 30, 255]);
        let img = ImageData::from_bytes(&bytes).unwrap();
        assert_eq!((img.width, img.height), (3, 2));
        assert_eq!(img.size_bytes(), ImageData::expected_len(3, 2));
        assert!(img.data.chunks(4).all(|px| px == [10, 20, 30, 255]));
    }

    #[test]
    fn test_load_png_from_file() {
        let path = std::env::temp_dir().join(format!("vkwaifu_loader_{}.png", std::process::id()));
        std::fs::write(&path, encoded_png(64, 64, [1, 2, 3, 4])).unwrap();

        let img = ImageData::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!((img.width, img.height, img.channels), (64, 64, 4));
        assert_eq!(&img.data[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = ImageData::from_file("definitely/not/here.png").unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = ImageData::from_bytes(b"not an image").unwrap_err();
        assert!(matches!(err, AssetError::LoadFailed(_)));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = ImageData::from_rgba8(vec![0; 15], 2, 2).unwrap_err();
        assert!(matches!(err, AssetError::InvalidData(_)));

        let err = ImageData::from_rgba8(Vec::new(), 0, 5).unwrap_err();
        assert!(matches!(err, AssetError::InvalidData(_)));
    }
}
