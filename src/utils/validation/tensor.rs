//! Tensor validation utilities

use crate::error::{CutoutError, Result};
use ndarray::Array4;

/// Validator for inference inputs and outputs
pub struct TensorValidator;

impl TensorValidator {
    /// Validate tensor shape matches expected dimensions
    ///
    /// # Errors
    /// - [`CutoutError::Inference`] on any dimension mismatch
    pub fn validate_tensor_shape(
        tensor: &Array4<f32>,
        expected_shape: (usize, usize, usize, usize),
    ) -> Result<()> {
        let actual = tensor.dim();
        if actual != expected_shape {
            let (b, c, h, w) = expected_shape;
            return Err(CutoutError::inference(format!(
                "Tensor shape mismatch. Expected [{b}, {c}, {h}, {w}], got [{}, {}, {}, {}]",
                actual.0, actual.1, actual.2, actual.3
            )));
        }
        Ok(())
    }

    /// Validate a raw saliency output: batch 1, at least one channel, non-empty and finite
    ///
    /// Channel 0 is the fused prediction; U²-Net exports may carry side outputs
    /// in further channels, which are ignored.
    ///
    /// # Errors
    /// - [`CutoutError::Inference`] describing the first violated rule
    pub fn validate_mask_output(tensor: &Array4<f32>) -> Result<()> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 {
            return Err(CutoutError::inference(format!(
                "Expected batch size 1 in model output, got {batch}"
            )));
        }
        if channels == 0 || height == 0 || width == 0 {
            return Err(CutoutError::inference(format!(
                "Model output is empty: [{batch}, {channels}, {height}, {width}]"
            )));
        }
        if tensor.iter().any(|v| !v.is_finite()) {
            return Err(CutoutError::inference(
                "Model output contains non-finite values (NaN or infinity)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tensor_shape() {
        let tensor = Array4::<f32>::zeros((1, 3, 320, 320));
        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 3, 320, 320)).is_ok());
        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 1, 320, 320)).is_err());
    }

    #[test]
    fn test_validate_mask_output() {
        assert!(TensorValidator::validate_mask_output(&Array4::zeros((1, 1, 320, 320))).is_ok());
        assert!(TensorValidator::validate_mask_output(&Array4::zeros((1, 7, 320, 320))).is_ok());
        assert!(TensorValidator::validate_mask_output(&Array4::zeros((2, 1, 320, 320))).is_err());
        assert!(TensorValidator::validate_mask_output(&Array4::zeros((1, 0, 320, 320))).is_err());

        let nan = Array4::from_elem((1, 1, 4, 4), f32::NAN);
        assert!(matches!(
            TensorValidator::validate_mask_output(&nan),
            Err(CutoutError::Inference(_))
        ));
    }
}
