use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, ImageError, Rgba, RgbImage};

/// Quality for every JPEG this crate writes (page files and PDF images).
pub const JPEG_QUALITY: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid image")]
    InvalidImage(#[from] image::ImageError),
}

/// Decodes a downloaded payload and flattens any transparency onto white,
/// yielding an opaque RGB image.
pub fn normalize(bytes: &[u8]) -> Result<RgbImage, NormalizeError> {
    let decoded = image::load_from_memory(bytes)?;
    Ok(flatten_onto_white(decoded))
}

pub fn flatten_onto_white(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }

    let top = image.into_rgba8();
    let (width, height) = top.dimensions();
    let mut canvas = ImageBuffer::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, &top, 0, 0);
    DynamicImage::ImageRgba8(canvas).into_rgb8()
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(out)
}
