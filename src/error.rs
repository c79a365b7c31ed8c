//! Error types for cutout pipeline operations

use std::path::Path;
use thiserror::Error;

/// Result type alias for cutout pipeline operations
pub type Result<T> = std::result::Result<T, CutoutError>;

/// Error taxonomy for the segmentation, compositing and enhancement pipeline
#[derive(Error, Debug)]
pub enum CutoutError {
    /// Model file missing, unreadable or rejected by the runtime. Fatal, never retried.
    #[error("Model initialization failed: {0}")]
    ModelInit(String),

    /// Source image could not be read or decoded
    #[error("Failed to decode '{source_name}': {message}")]
    Decode {
        source_name: String,
        message: String,
    },

    /// Unexpected tensor shape or runtime error during segmentation
    #[error("Inference error: {0}")]
    Inference(String),

    /// External upscaler missing, failed to start or exited non-zero
    #[error("External tool '{tool}' failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    /// User-requested interruption
    #[error("Operation cancelled")]
    Cancelled,

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding an image to an output format failed
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed request or image data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A job is already running
    #[error("Job rejected: {0}")]
    JobRejected(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CutoutError {
    /// Create a new model initialization error
    pub fn model_init<S: Into<String>>(msg: S) -> Self {
        Self::ModelInit(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new encoding error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an external tool failure
    pub fn external_tool<T: Into<String>, D: Into<String>>(tool: T, detail: D) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Create a decode failure naming the offending source
    pub fn decode_error<N: Into<String>>(source_name: N, error: &image::ImageError) -> Self {
        Self::Decode {
            source_name: source_name.into(),
            message: error.to_string(),
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let path_display = model_path.as_ref().display();
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::ModelInit(format!(
            "Failed to {operation} model '{path_display}': {error}.{suggestion_text}"
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range})"
        ))
    }

    /// Whether this error is the cancellation outcome rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether retrying with the same inputs can never succeed within this process
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ModelInit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CutoutError::invalid_config("test config error");
        assert!(matches!(err, CutoutError::InvalidConfig(_)));

        let err = CutoutError::external_tool("realesrgan", "exit status 1");
        assert!(matches!(err, CutoutError::ExternalTool { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = CutoutError::invalid_config("Invalid model path");
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model path");

        let err = CutoutError::external_tool("realesrgan-ncnn-vulkan", "exit status 3");
        assert_eq!(
            err.to_string(),
            "External tool 'realesrgan-ncnn-vulkan' failed: exit status 3"
        );
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = CutoutError::file_io_error("create output directory", Path::new("/out"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("create output directory"));
        assert!(error_string.contains("/out"));

        let err = CutoutError::model_error_with_context(
            "load",
            Path::new("/models/u2netp.onnx"),
            "file not found",
            &["check file path", "verify permissions"],
        );
        let error_string = err.to_string();
        assert!(error_string.contains("/models/u2netp.onnx"));
        assert!(error_string.contains("Suggestions"));
        assert!(err.is_fatal());

        let err = CutoutError::config_value_error("termination grace", 0, "1-60000 ms");
        assert!(err.to_string().contains("1-60000 ms"));
    }

    #[test]
    fn test_cancelled_is_not_fatal() {
        let err = CutoutError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_fatal());
    }
}
