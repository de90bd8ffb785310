use std::{io::Cursor, path::Path};

use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::error::{ForensicsError, Result};

/// Decoded source image: `width * height` RGBA samples, read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    samples: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, samples: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if samples.len() != expected {
            return Err(ForensicsError::InvalidPixelBuffer {
                expected,
                actual: samples.len(),
            });
        }

        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        Self {
            width,
            height,
            samples: rgba.into_raw(),
        }
    }

    /// Builds a buffer by evaluating `f(x, y) -> [r, g, b, a]` for every pixel.
    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> [u8; 4],
    {
        let mut samples = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                samples.extend_from_slice(&f(x, y));
            }
        }

        Self {
            width,
            height,
            samples,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.samples[i], self.samples[i + 1], self.samples[i + 2]]
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.samples.chunks_exact(4)
    }

    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.samples.clone())
    }
}

/// Module-owned RGBA raster for human inspection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<u8>,
}

impl RasterImage {
    /// Allocates an opaque black raster, reporting allocation failure instead of aborting.
    pub fn try_new(module: &'static str, width: u32, height: u32) -> Result<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or(ForensicsError::Rendering {
                module,
                width,
                height,
            })?;

        let mut samples = Vec::new();
        samples
            .try_reserve_exact(len)
            .map_err(|_| ForensicsError::Rendering {
                module,
                width,
                height,
            })?;
        for _ in 0..len / 4 {
            samples.extend_from_slice(&[0, 0, 0, 255]);
        }

        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.samples[i..i + 4].copy_from_slice(&rgba);
    }

    #[inline]
    pub fn put_gray(&mut self, x: u32, y: u32, value: u8) {
        self.put(x, y, [value, value, value, 255]);
    }

    pub fn get(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.samples[i],
            self.samples[i + 1],
            self.samples[i + 2],
            self.samples[i + 3],
        ]
    }

    pub fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            samples: image.into_raw(),
        }
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.samples.clone()).ok_or(
            ForensicsError::InvalidPixelBuffer {
                expected: self.width as usize * self.height as usize * 4,
                actual: self.samples.len(),
            },
        )
    }

    pub fn into_rgba_image(self) -> Result<RgbaImage> {
        let expected = self.width as usize * self.height as usize * 4;
        let actual = self.samples.len();
        RgbaImage::from_raw(self.width, self.height, self.samples)
            .ok_or(ForensicsError::InvalidPixelBuffer { expected, actual })
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.to_rgba_image()?
            .write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_rgba_image()?.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_rejects_bad_length() {
        let err = PixelBuffer::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            ForensicsError::InvalidPixelBuffer {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn test_from_fn_layout() {
        let buf = PixelBuffer::from_fn(3, 2, |x, y| [x as u8, y as u8, 7, 255]);
        assert_eq!(buf.samples().len(), 24);
        assert_eq!(buf.rgb(2, 1), [2, 1, 7]);
    }

    #[test]
    fn test_raster_is_opaque_black() {
        let raster = RasterImage::try_new("test", 4, 3).unwrap();
        assert_eq!(raster.samples.len(), 48);
        assert_eq!(raster.get(3, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn test_raster_too_large_is_rendering_error() {
        let err = RasterImage::try_new("test", u32::MAX, u32::MAX).unwrap_err();
        assert!(matches!(err, ForensicsError::Rendering { module: "test", .. }));
    }

    #[test]
    fn test_png_export_roundtrips_dimensions() {
        let mut raster = RasterImage::try_new("test", 5, 4).unwrap();
        raster.put_gray(1, 1, 200);
        let png = raster.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (5, 4));
        assert_eq!(decoded.get_pixel(1, 1).0, [200, 200, 200, 255]);
    }
}
