#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # photo-cutout
//!
//! Background removal, background recoloring and external super-resolution
//! for still images.
//!
//! Foreground masks come from the U²-Net-p segmentation network (320×320
//! input) run through ONNX Runtime or Tract. Masks are written into the alpha
//! channel or used to paint a solid background. Upscaling delegates to a
//! `realesrgan-ncnn-vulkan` compatible executable.
//!
//! ## Features
//!
//! - **Two Backends**: ONNX Runtime (optional CUDA/CoreML providers) and Tract (pure Rust)
//! - **Jobs**: single-image and sequential batch jobs with ordered progress events,
//!   per-item failure capture and cancellation
//! - **Subprocess Supervision**: graceful terminate, bounded wait, then kill
//! - **Temporary Files**: every temp path is tracked and removed on every exit path
//! - **CLI Integration**: optional `photo-cutout` binary (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photo_cutout::{JobOutcome, JobRunner, OperationKind, OperationRequest, PipelineConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder()
//!     .model_path("models/u2netp.onnx")
//!     .build()?;
//! let runner = JobRunner::from_config(&config)?;
//!
//! let request = OperationRequest::batch(
//!     ["a.jpg", "b.png"],
//!     OperationKind::RemoveBackground,
//!     "out",
//! );
//! let mut handle = runner.submit(request)?;
//! while let Some(event) = handle.next_event().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend
//! - `tract`: Pure Rust backend
//! - `cli` (default): Command-line interface, progress bars and tracing setup
//! - `webp-support` (default): WebP image format support
//! - `tracing-json`, `tracing-files`: extra log sinks for the CLI
//!
//! To use only as a library without CLI dependencies:
//!
//! ```toml
//! [dependencies]
//! photo-cutout = { version = "0.1", default-features = false, features = ["onnx"] }
//! ```

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod composite;
pub mod config;
pub mod enhance;
pub mod error;
pub mod inference;
pub mod job;
pub mod segmentation;
pub mod services;
pub mod temp;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::{available_backends, create_backend, MockBackend, MockOutput};
pub use codec::{ImageCodec, ImageSource, OutputFormat};
pub use composite::{apply_alpha, composite_background, fit_within, preview};
pub use config::{
    BackendType, EnhanceConfig, ExecutionProvider, ModelConfig, PipelineConfig,
    PipelineConfigBuilder,
};
pub use enhance::{EnhanceInput, Upscaler};
pub use error::{CutoutError, Result};
pub use inference::InferenceBackend;
pub use job::{
    BatchSummary, ItemFailure, JobEvent, JobHandle, JobOutcome, JobResult, JobRunner, JobState,
    OperationKind, OperationRequest, SingleOutput,
};
pub use segmentation::{SegmentationEngine, SegmentationTimings};
pub use services::{
    ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage, ProgressReporter,
    ProgressTracker, ProgressUpdate,
};
pub use temp::{ScopedDir, TempArtifact, TempResourceTracker};
pub use types::{Image, Mask, PixelFormat, Rgb};

#[cfg(feature = "cli")]
pub use tracing_config::{events, init_cli_tracing, spans, TracingConfig, TracingFormat, TracingOutput};

/// Remove the background from encoded image bytes
///
/// Decoding and segmentation run on the blocking thread pool.
///
/// # Examples
/// ```rust,no_run
/// use photo_cutout::{remove_background_from_bytes, ModelConfig, SegmentationEngine};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let engine = SegmentationEngine::from_config(&ModelConfig::default())?;
/// let cutout = remove_background_from_bytes(&upload, &engine).await?;
/// assert!(cutout.format().has_alpha());
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    engine: &SegmentationEngine,
) -> Result<Image> {
    let bytes = image_bytes.to_vec();
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || {
        let image = ImageCodec::decode(&bytes, "<bytes>")?;
        engine.remove_background(&image)
    })
    .await
    .map_err(|e| CutoutError::internal(format!("Background removal task failed: {e}")))?
}

/// Remove the background from an async reader stream
///
/// The whole stream is read into memory before decoding.
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    engine: &SegmentationEngine,
) -> Result<Image> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer).await?;
    remove_background_from_bytes(&buffer, engine).await
}
