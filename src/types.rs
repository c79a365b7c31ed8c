//! Core raster types shared by every pipeline stage

use crate::error::{CutoutError, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pixel layout of an [`Image`] buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel
    Rgb8,
    /// Packed 8-bit RGBA, straight alpha, 4 bytes per pixel
    Rgba8,
}

impl PixelFormat {
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }

    #[must_use]
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb8 => write!(f, "RGB8"),
            Self::Rgba8 => write!(f, "RGBA8"),
        }
    }
}

/// Owned, decoded raster
///
/// The buffer length always equals `width * height * format.bytes_per_pixel()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

fn expected_len(width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(bytes_per_pixel))
        .ok_or_else(|| {
            CutoutError::invalid_input(format!("Image dimensions {width}x{height} overflow"))
        })
}

impl Image {
    /// Wrap a packed pixel buffer
    ///
    /// # Errors
    /// - Zero width or height
    /// - Buffer length does not match the dimensions and pixel format
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CutoutError::invalid_input(format!(
                "Image dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = expected_len(width, height, format.bytes_per_pixel())?;
        if data.len() != expected {
            return Err(CutoutError::invalid_input(format!(
                "{format} buffer for {width}x{height} must be {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Create an image filled with a single RGB color
    ///
    /// # Errors
    /// - Zero width or height
    pub fn filled(width: u32, height: u32, color: Rgb) -> Result<Self> {
        let len = expected_len(width, height, 3)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / 3 {
            data.extend_from_slice(&color.to_array());
        }
        Self::new(width, height, PixelFormat::Rgb8, data)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Whether any pixel is less than fully opaque
    #[must_use]
    pub fn has_transparency(&self) -> bool {
        match self.format {
            PixelFormat::Rgb8 => false,
            PixelFormat::Rgba8 => self.data.chunks_exact(4).any(|px| px.get(3) != Some(&255)),
        }
    }

    /// Convert to packed RGB, dropping any alpha channel
    #[must_use]
    pub fn to_rgb(&self) -> Self {
        match self.format {
            PixelFormat::Rgb8 => self.clone(),
            PixelFormat::Rgba8 => {
                let data = self
                    .data
                    .chunks_exact(4)
                    .flat_map(|px| px.iter().take(3).copied())
                    .collect();
                Self {
                    width: self.width,
                    height: self.height,
                    format: PixelFormat::Rgb8,
                    data,
                }
            },
        }
    }

    /// Convert to packed RGBA; RGB input gains an opaque alpha channel
    #[must_use]
    pub fn to_rgba(&self) -> Self {
        match self.format {
            PixelFormat::Rgba8 => self.clone(),
            PixelFormat::Rgb8 => {
                let mut data = Vec::with_capacity(self.data.len() / 3 * 4);
                for px in self.data.chunks_exact(3) {
                    data.extend_from_slice(px);
                    data.push(255);
                }
                Self {
                    width: self.width,
                    height: self.height,
                    format: PixelFormat::Rgba8,
                    data,
                }
            },
        }
    }

    /// Build from an `image` crate value, keeping alpha when the source has it
    ///
    /// # Errors
    /// - Zero-sized source image
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        if image.color().has_alpha() {
            let rgba = image.to_rgba8();
            let (w, h) = rgba.dimensions();
            Self::new(w, h, PixelFormat::Rgba8, rgba.into_raw())
        } else {
            let rgb = image.to_rgb8();
            let (w, h) = rgb.dimensions();
            Self::new(w, h, PixelFormat::Rgb8, rgb.into_raw())
        }
    }

    /// Convert into the `image` crate representation for codec and resize work
    ///
    /// # Errors
    /// - Never in practice; the buffer invariant guarantees a valid container
    pub fn to_dynamic(&self) -> Result<DynamicImage> {
        let mismatch = || CutoutError::internal("Pixel buffer does not match image dimensions");
        match self.format {
            PixelFormat::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(mismatch),
            PixelFormat::Rgba8 => RgbaImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(mismatch),
        }
    }
}

/// Single-channel foreground opacity map, 0 is background and 255 is foreground
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    /// # Errors
    /// - Zero width or height
    /// - Buffer length is not `width * height`
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CutoutError::invalid_input(format!(
                "Mask dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = expected_len(width, height, 1)?;
        if data.len() != expected {
            return Err(CutoutError::invalid_input(format!(
                "Mask buffer for {width}x{height} must be {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Uniform mask
    ///
    /// # Errors
    /// - Zero width or height
    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self> {
        let len = expected_len(width, height, 1)?;
        Self::new(width, height, vec![value; len])
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bilinear resize to the given dimensions
    ///
    /// # Errors
    /// - Zero target dimensions
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        let gray = GrayImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| CutoutError::internal("Mask buffer does not match dimensions"))?;
        let resized =
            image::imageops::resize(&gray, width, height, image::imageops::FilterType::Triangle);
        Self::new(width, height, resized.into_raw())
    }
}

/// Opaque 8-bit background color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = CutoutError;

    /// Accepts `#rrggbb`, `rrggbb` or `r,g,b`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || {
            CutoutError::invalid_input(format!(
                "Invalid color '{s}' (expected #rrggbb, rrggbb or r,g,b)"
            ))
        };

        if s.contains(',') {
            let parts = s
                .split(',')
                .map(|p| p.trim().parse::<u8>().map_err(|_| invalid()))
                .collect::<Result<Vec<u8>>>()?;
            return match parts.as_slice() {
                [r, g, b] => Ok(Self::new(*r, *g, *b)),
                _ => Err(invalid()),
            };
        }

        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(invalid)
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_rejects_bad_buffer() {
        assert!(Image::new(2, 2, PixelFormat::Rgb8, vec![0; 12]).is_ok());
        assert!(Image::new(2, 2, PixelFormat::Rgb8, vec![0; 11]).is_err());
        assert!(Image::new(2, 2, PixelFormat::Rgba8, vec![0; 12]).is_err());
        assert!(Image::new(0, 2, PixelFormat::Rgb8, vec![]).is_err());
    }

    #[test]
    fn test_rgb_rgba_conversion() {
        let rgb = Image::new(2, 1, PixelFormat::Rgb8, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let rgba = rgb.to_rgba();
        assert_eq!(rgba.data(), &[1, 2, 3, 255, 4, 5, 6, 255]);
        assert!(!rgba.has_transparency());
        assert_eq!(rgba.to_rgb(), rgb);
    }

    #[test]
    fn test_dynamic_round_trip_keeps_alpha() {
        let img = Image::new(1, 1, PixelFormat::Rgba8, vec![10, 20, 30, 40]).unwrap();
        let dynamic = img.to_dynamic().unwrap();
        assert!(dynamic.color().has_alpha());
        assert_eq!(Image::from_dynamic(&dynamic).unwrap(), img);
        assert!(img.has_transparency());
    }

    #[test]
    fn test_mask_resize() {
        let mask = Mask::filled(4, 4, 200).unwrap();
        let resized = mask.resize(9, 3).unwrap();
        assert_eq!(resized.dimensions(), (9, 3));
        assert!(resized.data().iter().all(|&v| v == 200));
        assert!(Mask::new(2, 2, vec![0; 3]).is_err());
    }

    #[test]
    fn test_rgb_parsing() {
        assert_eq!("#ff8000".parse::<Rgb>().unwrap(), Rgb::new(255, 128, 0));
        assert_eq!("00FF00".parse::<Rgb>().unwrap(), Rgb::new(0, 255, 0));
        assert_eq!(" 1, 2 ,3".parse::<Rgb>().unwrap(), Rgb::new(1, 2, 3));
        assert!("#ff80".parse::<Rgb>().is_err());
        assert!("256,0,0".parse::<Rgb>().is_err());
        assert!("1,2".parse::<Rgb>().is_err());
        assert!("zzzzzz".parse::<Rgb>().is_err());
        assert_eq!(Rgb::new(255, 128, 0).to_string(), "#ff8000");
        assert_eq!(Rgb::default(), Rgb::WHITE);
    }
}
