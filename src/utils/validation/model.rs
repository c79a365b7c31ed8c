//! Model file validation
//!
//! Runs before any runtime session is created so a bad path fails with a
//! readable [`CutoutError::ModelInit`] instead of a runtime-specific message.

use crate::error::{CutoutError, Result};
use std::path::Path;

/// Validator for segmentation model artifacts
pub struct ModelValidator;

impl ModelValidator {
    /// Check that `path` names a non-empty `.onnx` file
    ///
    /// Returns the file size in bytes.
    ///
    /// # Errors
    /// - [`CutoutError::ModelInit`] when the path is missing, a directory,
    ///   has another extension or is empty
    pub fn validate_model_path(path: &Path) -> Result<u64> {
        if !path.exists() {
            return Err(CutoutError::model_error_with_context(
                "locate",
                path,
                "file does not exist",
                &["pass --model with the path to u2netp.onnx", "check the config file"],
            ));
        }

        let metadata = std::fs::metadata(path).map_err(|e| {
            CutoutError::model_error_with_context("read", path, &e.to_string(), &[])
        })?;
        if !metadata.is_file() {
            return Err(CutoutError::model_error_with_context(
                "load",
                path,
                "path is not a regular file",
                &[],
            ));
        }

        let is_onnx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            return Err(CutoutError::model_error_with_context(
                "load",
                path,
                "expected a .onnx file",
                &[],
            ));
        }

        if metadata.len() == 0 {
            return Err(CutoutError::model_error_with_context(
                "load",
                path,
                "file is empty",
                &["re-download the model"],
            ));
        }

        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model() {
        let err = ModelValidator::validate_model_path(Path::new("/nonexistent/u2netp.onnx"))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_directory_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelValidator::validate_model_path(dir.path()).is_err());

        let wrong = dir.path().join("model.bin");
        std::fs::write(&wrong, b"data").unwrap();
        let err = ModelValidator::validate_model_path(&wrong).unwrap_err();
        assert!(err.to_string().contains(".onnx"));
    }

    #[test]
    fn test_empty_and_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.onnx");
        std::fs::write(&empty, b"").unwrap();
        assert!(ModelValidator::validate_model_path(&empty).is_err());

        let model = dir.path().join("u2netp.ONNX");
        std::fs::write(&model, b"not really a model").unwrap();
        assert_eq!(ModelValidator::validate_model_path(&model).unwrap(), 18);
    }
}
