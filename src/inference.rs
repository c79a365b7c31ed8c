//! Inference backend abstraction

use crate::{config::ModelConfig, error::Result};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Side length of the square U²-Net-p input
pub const MODEL_INPUT_SIZE: usize = 320;

/// Input tensor shape (NCHW)
pub const MODEL_INPUT_SHAPE: (usize, usize, usize, usize) = (1, 3, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE);

/// Output tensor shape (NCHW, single-channel saliency)
pub const MODEL_OUTPUT_SHAPE: (usize, usize, usize, usize) =
    (1, 1, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE);

/// Trait for inference backends
///
/// Implementations own one loaded model session. Callers serialize access, so
/// `infer` takes `&mut self` and backends need not be `Sync`.
pub trait InferenceBackend {
    /// Load the model described by `config`
    ///
    /// Returns the load time on first initialization and `None` when the
    /// backend was already initialized.
    ///
    /// # Errors
    /// - Model file missing, empty or not an ONNX file
    /// - Runtime rejects the model
    fn initialize(&mut self, config: &ModelConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output is not a 4-D tensor
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get the expected input shape for this backend
    fn input_shape(&self) -> (usize, usize, usize, usize) {
        MODEL_INPUT_SHAPE
    }

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

/// Convert a dynamic-rank output into `Array4`, rejecting other ranks
///
/// # Errors
/// - Output rank is not 4
pub(crate) fn into_array4(shape: &[usize], data: Vec<f32>) -> Result<Array4<f32>> {
    match *shape {
        [n, c, h, w] => Array4::from_shape_vec((n, c, h, w), data).map_err(|e| {
            crate::error::CutoutError::inference(format!("Failed to reshape output tensor: {e}"))
        }),
        _ => Err(crate::error::CutoutError::inference(format!(
            "Expected 4D output tensor, got {}D",
            shape.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;

    #[test]
    fn test_default_shapes() {
        let backend = MockBackend::new();
        assert_eq!(backend.input_shape(), (1, 3, 320, 320));
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_into_array4() {
        let array = into_array4(&[1, 1, 2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(array[[0, 0, 1, 1]], 3.0);

        assert!(into_array4(&[2, 2], vec![0.0; 4]).is_err());
        assert!(into_array4(&[1, 1, 2, 2], vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_backend_as_trait_object() {
        let mut backend: Box<dyn InferenceBackend + Send> = Box::new(MockBackend::new());
        let load = backend.initialize(&ModelConfig::default()).unwrap();
        assert!(load.is_some());
        assert!(backend.is_initialized());
        assert!(backend.initialize(&ModelConfig::default()).unwrap().is_none());
        assert_eq!(backend.name(), "mock");
    }
}
