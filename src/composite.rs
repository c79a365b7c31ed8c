//! Alpha application, background compositing and aspect-preserving geometry

use crate::{
    error::{CutoutError, Result},
    types::{Image, Mask, PixelFormat, Rgb},
};
use image::imageops::FilterType;

/// Write `mask` into the alpha channel of `image`
///
/// The result is always RGBA. Any existing alpha is replaced.
///
/// # Errors
/// - Image and mask dimensions differ
pub fn apply_alpha(image: &Image, mask: &Mask) -> Result<Image> {
    if image.dimensions() != mask.dimensions() {
        let (iw, ih) = image.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(CutoutError::invalid_input(format!(
            "Mask {mw}x{mh} does not match image {iw}x{ih}"
        )));
    }

    let rgba = image.to_rgba();
    let (width, height) = rgba.dimensions();
    let mut data = rgba.into_data();
    for (px, &alpha) in data.chunks_exact_mut(4).zip(mask.data()) {
        if let Some(a) = px.get_mut(3) {
            *a = alpha;
        }
    }
    Image::new(width, height, PixelFormat::Rgba8, data)
}

#[inline]
fn blend(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = u32::from(alpha);
    ((u32::from(fg) * a + u32::from(bg) * (255 - a) + 127) / 255) as u8
}

/// Alpha-over `foreground` onto an opaque canvas of `color`
///
/// Straight (non-premultiplied) alpha with rounding, so alpha 255 keeps the
/// foreground exactly and alpha 0 yields the canvas color. An RGB foreground is
/// treated as fully opaque. The result is always opaque RGB.
///
/// # Errors
/// - Never for a valid [`Image`]
pub fn composite_background(foreground: &Image, color: Rgb) -> Result<Image> {
    let (width, height) = foreground.dimensions();
    if foreground.format() == PixelFormat::Rgb8 {
        return Ok(foreground.clone());
    }

    let bg = color.to_array();
    let mut data = Vec::with_capacity(foreground.data().len() / 4 * 3);
    for px in foreground.data().chunks_exact(4) {
        if let [r, g, b, a] = *px {
            data.push(blend(r, bg[0], a));
            data.push(blend(g, bg[1], a));
            data.push(blend(b, bg[2], a));
        }
    }
    Image::new(width, height, PixelFormat::Rgb8, data)
}

/// Largest size with the same aspect ratio as `width`x`height` that fits the bounds
///
/// Images already inside the bounds are returned unchanged. Both output
/// dimensions are at least 1.
#[must_use]
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max_width == 0 || max_height == 0 {
        return (width.min(max_width).max(1), height.min(max_height).max(1));
    }
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let scale = (f64::from(max_width) / f64::from(width)).min(f64::from(max_height) / f64::from(height));
    let w = (f64::from(width) * scale).round().clamp(1.0, f64::from(max_width)) as u32;
    let h = (f64::from(height) * scale).round().clamp(1.0, f64::from(max_height)) as u32;
    (w, h)
}

/// Downscaled copy for display, keeping aspect ratio and pixel format
///
/// # Errors
/// - Never for a valid [`Image`]
pub fn preview(image: &Image, max_width: u32, max_height: u32) -> Result<Image> {
    let (width, height) = image.dimensions();
    let (w, h) = fit_within(width, height, max_width, max_height);
    if (w, h) == (width, height) {
        return Ok(image.clone());
    }
    let resized = image.to_dynamic()?.resize_exact(w, h, FilterType::Triangle);
    Image::from_dynamic(&resized)
}
