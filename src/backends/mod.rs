//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend (high performance, optional GPU acceleration)
//! - Tract backend (pure Rust, no external runtime)
//! - Mock backend (deterministic output, no model file)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod mock;

use crate::config::BackendType;
use crate::error::{CutoutError, Result};
use crate::inference::InferenceBackend;

// Re-export backends based on enabled features
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

pub use self::mock::{MockBackend, MockOutput, MockStats};

/// Create an uninitialized backend of the requested type
///
/// # Errors
/// - The crate was built without the feature for `backend_type`
pub fn create_backend(backend_type: BackendType) -> Result<Box<dyn InferenceBackend + Send>> {
    match backend_type {
        #[cfg(feature = "onnx")]
        BackendType::Onnx => Ok(Box::new(OnnxBackend::new())),
        #[cfg(feature = "tract")]
        BackendType::Tract => Ok(Box::new(TractBackend::new())),
        #[allow(unreachable_patterns)]
        other => Err(CutoutError::invalid_config(format!(
            "Backend '{other}' is not available in this build (enable the '{other}' feature)"
        ))),
    }
}

/// Backend types compiled into this build
#[must_use]
pub fn available_backends() -> Vec<BackendType> {
    #[allow(unused_mut)]
    let mut backends = Vec::new();
    #[cfg(feature = "onnx")]
    backends.push(BackendType::Onnx);
    #[cfg(feature = "tract")]
    backends.push(BackendType::Tract);
    backends
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_backends_follow_features() {
        let backends = available_backends();
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
        assert_eq!(backends.contains(&BackendType::Tract), cfg!(feature = "tract"));
    }

    #[test]
    fn test_create_backend_matches_features() {
        for backend_type in [BackendType::Onnx, BackendType::Tract] {
            let result = create_backend(backend_type);
            assert_eq!(
                result.is_ok(),
                available_backends().contains(&backend_type),
                "{backend_type}"
            );
            if let Ok(backend) = result {
                assert!(!backend.is_initialized());
                assert_eq!(backend.name(), backend_type.to_string());
            }
        }
    }
}
