//! Tensor conversion around the segmentation model
//!
//! Input: RGB, bilinear resize to the fixed model size, scale to `[0, 1]`,
//! NCHW layout with a batch of one. Output: min-max normalized saliency
//! quantized to 8 bits at model resolution.

use crate::{
    error::{CutoutError, Result},
    inference::MODEL_INPUT_SIZE,
    types::{Image, Mask},
};
use image::imageops::FilterType;
use ndarray::{Array4, ArrayView2};

/// Guards the min-max division when the prediction is flat
pub const NORMALIZATION_EPSILON: f32 = 1e-8;

/// Shared tensor conversion utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image for model inference
    ///
    /// The aspect ratio is not preserved; the model was trained on stretched
    /// square inputs and the mask is stretched back afterwards.
    ///
    /// # Errors
    /// - Conversion of the source buffer fails
    pub fn preprocess_for_inference(image: &Image) -> Result<Array4<f32>> {
        let rgb = image.to_rgb().to_dynamic()?.to_rgb8();
        let size = MODEL_INPUT_SIZE as u32;
        let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match the resized image
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            tensor[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            tensor[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }

        Ok(tensor)
    }

    /// Min-max normalize a raw prediction and quantize it to a mask
    ///
    /// Values are truncated, not rounded, after scaling to 255. A constant
    /// prediction yields an all-zero mask.
    ///
    /// # Errors
    /// - Prediction is empty
    pub fn prediction_to_mask(prediction: ArrayView2<'_, f32>) -> Result<Mask> {
        let (height, width) = prediction.dim();
        if height == 0 || width == 0 {
            return Err(CutoutError::inference("Prediction has no pixels"));
        }

        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min + NORMALIZATION_EPSILON;

        let data = prediction
            .iter()
            .map(|&v| {
                let normalized = ((v - min) / range).clamp(0.0, 1.0);
                (normalized * 255.0) as u8
            })
            .collect();

        Mask::new(width as u32, height as u32, data)
    }

    /// Normalize, quantize and resize a raw prediction back to the source size
    ///
    /// # Errors
    /// - Prediction is empty
    pub fn postprocess(prediction: ArrayView2<'_, f32>, width: u32, height: u32) -> Result<Mask> {
        Self::prediction_to_mask(prediction)?.resize(width, height)
    }
}
