//! Foreground segmentation with a lazily loaded, shared model
//!
//! [`SegmentationEngine`] is a cheap `Clone` handle. All clones share one
//! backend behind a mutex, so inference calls never overlap. The model is
//! loaded on first use; a failed load is remembered and every later call
//! returns the same [`CutoutError::ModelInit`] without retrying.

use crate::{
    backends::create_backend,
    composite::apply_alpha,
    config::ModelConfig,
    error::{CutoutError, Result},
    inference::InferenceBackend,
    types::{Image, Mask},
    utils::{ImagePreprocessor, TensorValidator},
};
use instant::{Duration, Instant};
use ndarray::{s, Array4};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug as trace_debug, instrument, span, Level};

/// Per-call timing breakdown in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentationTimings {
    pub model_load_ms: Option<u64>,
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    pub postprocessing_ms: u64,
}

impl SegmentationTimings {
    #[must_use]
    pub fn total_ms(&self) -> u64 {
        self.model_load_ms.unwrap_or(0)
            + self.preprocessing_ms
            + self.inference_ms
            + self.postprocessing_ms
    }
}

#[derive(Debug, Clone)]
enum InitState {
    Uninitialized,
    Ready,
    Failed(String),
}

struct EngineState {
    backend: Box<dyn InferenceBackend + Send>,
    init: InitState,
}

impl EngineState {
    /// Load the model once; returns the load time when this call did the loading
    fn ensure_initialized(&mut self, config: &ModelConfig) -> Result<Option<Duration>> {
        match &self.init {
            InitState::Ready => Ok(None),
            InitState::Failed(message) => Err(CutoutError::ModelInit(message.clone())),
            InitState::Uninitialized => {
                log::info!(
                    "Loading segmentation model {} with {} backend",
                    config.path.display(),
                    self.backend.name()
                );
                match self.backend.initialize(config) {
                    Ok(load_time) => {
                        self.init = InitState::Ready;
                        Ok(load_time)
                    },
                    Err(e) => {
                        let message = match e {
                            CutoutError::ModelInit(message) => message,
                            other => other.to_string(),
                        };
                        log::error!("❌ Segmentation model failed to load: {message}");
                        self.init = InitState::Failed(message.clone());
                        Err(CutoutError::ModelInit(message))
                    },
                }
            },
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Shared handle to the segmentation model
#[derive(Clone)]
pub struct SegmentationEngine {
    state: Arc<Mutex<EngineState>>,
    config: Arc<ModelConfig>,
}

impl std::fmt::Debug for SegmentationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationEngine")
            .field("model", &self.config.path)
            .field("backend", &self.config.backend)
            .finish_non_exhaustive()
    }
}

impl SegmentationEngine {
    /// Wrap an uninitialized backend; nothing is loaded until first use
    #[must_use]
    pub fn new(backend: Box<dyn InferenceBackend + Send>, config: ModelConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                backend,
                init: InitState::Uninitialized,
            })),
            config: Arc::new(config),
        }
    }

    /// Create an engine with the backend named in `config`
    ///
    /// # Errors
    /// - The requested backend is not compiled into this build
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let backend = create_backend(config.backend)?;
        Ok(Self::new(backend, config.clone()))
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| CutoutError::internal("Segmentation engine lock poisoned"))
    }

    /// Load the model now instead of on first segmentation
    ///
    /// # Errors
    /// - [`CutoutError::ModelInit`], now or remembered from an earlier attempt
    pub fn initialize(&self) -> Result<Option<Duration>> {
        self.lock()?.ensure_initialized(&self.config)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock()
            .map(|state| matches!(state.init, InitState::Ready))
            .unwrap_or(false)
    }

    /// Compute the foreground mask for `image` at its own resolution
    ///
    /// # Errors
    /// - [`CutoutError::ModelInit`] if the model cannot be loaded
    /// - [`CutoutError::Inference`] on runtime failure or malformed output
    pub fn segment(&self, image: &Image) -> Result<Mask> {
        self.segment_with_timings(image).map(|(mask, _)| mask)
    }

    /// [`segment`](Self::segment) plus a timing breakdown
    ///
    /// # Errors
    /// Same as [`segment`](Self::segment)
    #[instrument(
        skip(self, image),
        fields(dimensions = %format!("{}x{}", image.width(), image.height()))
    )]
    pub fn segment_with_timings(&self, image: &Image) -> Result<(Mask, SegmentationTimings)> {
        let mut timings = SegmentationTimings::default();

        let input_tensor = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            let start = Instant::now();
            let tensor = ImagePreprocessor::preprocess_for_inference(image)?;
            timings.preprocessing_ms = millis(start.elapsed());
            tensor
        };

        let output_tensor = {
            let mut state = self.lock()?;
            timings.model_load_ms = state.ensure_initialized(&self.config)?.map(millis);
            TensorValidator::validate_tensor_shape(&input_tensor, state.backend.input_shape())?;

            let _span = span!(Level::INFO, "inference", backend = state.backend.name()).entered();
            let start = Instant::now();
            let output = state.backend.infer(&input_tensor)?;
            timings.inference_ms = millis(start.elapsed());
            output
        };

        let mask = {
            let _span = span!(Level::DEBUG, "postprocessing").entered();
            let start = Instant::now();
            let mask = Self::output_to_mask(&output_tensor, image.width(), image.height())?;
            timings.postprocessing_ms = millis(start.elapsed());
            mask
        };

        trace_debug!(
            preprocessing_ms = timings.preprocessing_ms,
            inference_ms = timings.inference_ms,
            postprocessing_ms = timings.postprocessing_ms,
            "Segmentation complete"
        );
        Ok((mask, timings))
    }

    /// Turn raw model output into a mask of the given size
    ///
    /// # Errors
    /// - [`CutoutError::Inference`] when the output is malformed
    pub fn output_to_mask(output: &Array4<f32>, width: u32, height: u32) -> Result<Mask> {
        TensorValidator::validate_mask_output(output)?;
        let prediction = output.slice(s![0, 0, .., ..]);
        ImagePreprocessor::postprocess(prediction, width, height)
    }

    /// Segment and write the mask into the alpha channel
    ///
    /// # Errors
    /// Same as [`segment`](Self::segment)
    pub fn remove_background(&self, image: &Image) -> Result<Image> {
        let mask = self.segment(image)?;
        apply_alpha(image, &mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockOutput};
    use crate::types::{PixelFormat, Rgb};

    fn engine(backend: MockBackend) -> SegmentationEngine {
        SegmentationEngine::new(Box::new(backend), ModelConfig::default())
    }

    #[test]
    fn test_lazy_initialization_happens_once() {
        let backend = MockBackend::new();
        let stats = backend.stats();
        let engine = engine(backend);
        assert!(!engine.is_initialized());

        let image = Image::filled(64, 48, Rgb::new(10, 20, 30)).unwrap();
        let first = engine.segment(&image).unwrap();
        let second = engine.clone().segment(&image).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.dimensions(), (64, 48));
        assert!(engine.is_initialized());
        assert_eq!(stats.count("initialize"), 1);
        assert_eq!(stats.count("infer"), 2);
    }

    #[test]
    fn test_failed_initialization_is_not_retried() {
        let backend = MockBackend::new_failing_init();
        let stats = backend.stats();
        let engine = engine(backend);
        let image = Image::filled(8, 8, Rgb::WHITE).unwrap();

        let first = engine.segment(&image).unwrap_err();
        let second = engine.segment(&image).unwrap_err();
        assert!(first.is_fatal());
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(stats.count("initialize"), 1);
        assert_eq!(stats.count("infer"), 0);
    }

    #[test]
    fn test_inference_failure_is_inference_error() {
        let engine = engine(MockBackend::new_failing_inference());
        let image = Image::filled(8, 8, Rgb::WHITE).unwrap();
        assert!(matches!(
            engine.segment(&image),
            Err(CutoutError::Inference(_))
        ));
    }

    #[test]
    fn test_constant_output_gives_transparent_mask() {
        let engine = engine(MockBackend::new().with_output(MockOutput::Constant(0.7)));
        let image = Image::filled(30, 20, Rgb::WHITE).unwrap();
        let mask = engine.segment(&image).unwrap();
        assert!(mask.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_remove_background_returns_rgba() {
        let engine = engine(MockBackend::new());
        let image = Image::filled(100, 100, Rgb::new(200, 100, 50)).unwrap();
        let cut = engine.remove_background(&image).unwrap();

        assert_eq!(cut.format(), PixelFormat::Rgba8);
        assert_eq!(cut.dimensions(), (100, 100));
        let alpha_at = |x: usize, y: usize| cut.data()[(y * 100 + x) * 4 + 3];
        assert_eq!(alpha_at(0, 0), 0);
        assert!(alpha_at(50, 50) > 200);
    }

    #[test]
    fn test_malformed_output_rejected() {
        let bad = Array4::<f32>::zeros((2, 1, 320, 320));
        let engine = engine(MockBackend::new().with_output(MockOutput::Tensor(bad)));
        let image = Image::filled(8, 8, Rgb::WHITE).unwrap();
        assert!(matches!(
            engine.segment(&image),
            Err(CutoutError::Inference(_))
        ));
    }

    #[test]
    fn test_timings_report_model_load_once() {
        let engine = engine(MockBackend::new());
        let image = Image::filled(8, 8, Rgb::WHITE).unwrap();
        let (_, first) = engine.segment_with_timings(&image).unwrap();
        let (_, second) = engine.segment_with_timings(&image).unwrap();
        assert!(first.model_load_ms.is_some());
        assert!(second.model_load_ms.is_none());
    }
}
