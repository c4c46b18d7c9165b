use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use thiserror::Error;

use crate::error::Result;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image data")]
    Empty,

    #[error("could not decode image: {0}")]
    Invalid(#[from] image::ImageError),
}

/// What the annotation is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backdrop {
    /// Luma of the input, expanded back to RGB.
    #[default]
    Grayscale,
    Original,
}

/// Decode any raster format `image` recognizes from its magic bytes.
pub fn decode(bytes: &[u8]) -> std::result::Result<DynamicImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(image::load_from_memory(bytes)?)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(image)?;
    Ok(out)
}

/// Working buffer the renderer draws on.
pub fn backdrop(image: &DynamicImage, kind: Backdrop) -> RgbImage {
    match kind {
        Backdrop::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()).to_rgb8(),
        Backdrop::Original => image.to_rgb8(),
    }
}
