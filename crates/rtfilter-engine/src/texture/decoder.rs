use std::path::Path;

use image::ImageFormat;

use super::DecodeFormat;
use crate::error::AssetError;

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Image of `width * height` copies of `rgba`.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat((width * height) as usize);
        Self { width, height, pixels }
    }
}

/// Turns an image file into pixels.
pub trait TextureDecoder {
    fn decode(&self, format: DecodeFormat, path: &Path) -> Result<DecodedImage, AssetError>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl TextureDecoder for ImageDecoder {
    fn decode(&self, format: DecodeFormat, path: &Path) -> Result<DecodedImage, AssetError> {
        let bytes = std::fs::read(path).map_err(|source| AssetError::Io { path: path.to_path_buf(), source })?;
        let decoded = match format {
            DecodeFormat::Generic => image::load_from_memory(&bytes),
            DecodeFormat::Tga => image::load_from_memory_with_format(&bytes, ImageFormat::Tga),
            DecodeFormat::Dds => image::load_from_memory_with_format(&bytes, ImageFormat::Dds),
        }
        .map_err(|e| AssetError::Decode { path: path.to_path_buf(), message: e.to_string() })?;

        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(AssetError::Decode {
                path: path.to_path_buf(),
                message: "image has no pixels".into(),
            });
        }
        Ok(DecodedImage { width, height, pixels: rgba.into_raw() })
    }
}
