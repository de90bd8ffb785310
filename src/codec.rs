//! Boundaries to the outside world: decoding source bytes and lossy re-encoding.

use std::io::Cursor;

use image::{DynamicImage, codecs::jpeg::JpegEncoder};

use crate::{
    error::{ForensicsError, Result},
    raster::PixelBuffer,
};

/// Turns encoded file bytes into a [`PixelBuffer`].
pub trait PixelSource: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer>;
}

/// Pushes a buffer through a lossy codec and back.
pub trait Reencoder: Send + Sync {
    /// `quality` is in `(0, 1]`.
    fn reencode(&self, pixels: &PixelBuffer, quality: f64) -> Result<PixelBuffer>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl PixelSource for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| ForensicsError::Decode(e.to_string()))?;

        Ok(PixelBuffer::from_dynamic(&image))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JpegReencoder;

impl JpegReencoder {
    fn encoder_quality(quality: f64) -> Result<u8> {
        if !(quality > 0.0 && quality <= 1.0) {
            return Err(ForensicsError::InvalidParameter(format!(
                "re-encode quality must be in (0, 1], got {quality}"
            )));
        }

        Ok(((quality * 100.0).round() as u8).clamp(1, 100))
    }
}

impl Reencoder for JpegReencoder {
    fn reencode(&self, pixels: &PixelBuffer, quality: f64) -> Result<PixelBuffer> {
        let quality = Self::encoder_quality(quality)?;
        let rgba = pixels.to_rgba_image().ok_or(ForensicsError::InvalidPixelBuffer {
            expected: pixels.pixel_count() * 4,
            actual: pixels.samples().len(),
        })?;
        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

        let mut buffer = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
        DynamicImage::ImageRgb8(rgb)
            .write_with_encoder(encoder)
            .map_err(|e| ForensicsError::Encode(e.to_string()))?;

        let recompressed = image::load_from_memory(&buffer.into_inner())
            .map_err(|e| ForensicsError::Encode(e.to_string()))?;

        Ok(PixelBuffer::from_dynamic(&recompressed))
    }
}

/// Best-effort mime type from a file extension.
pub fn guess_mime_type(file_name: &str) -> &'static str {
    std::path::Path::new(file_name)
        .extension()
        .and_then(image::ImageFormat::from_extension)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}
