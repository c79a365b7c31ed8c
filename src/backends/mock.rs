//! Deterministic in-process backend
//!
//! Produces a soft circular saliency map without loading any model, so the
//! whole pipeline can run in tests, benchmarks and demos. Call counters are
//! shared through [`MockStats`] and stay readable after the backend has been
//! boxed and handed to a [`SegmentationEngine`](crate::SegmentationEngine).

use crate::{
    config::ModelConfig,
    error::{CutoutError, Result},
    inference::{InferenceBackend, MODEL_OUTPUT_SHAPE},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shape of the saliency map the mock returns
#[derive(Debug, Clone)]
pub enum MockOutput {
    /// Centered soft disc, high inside and low outside
    Circle,
    /// Every value equal
    Constant(f32),
    /// Fixed tensor returned as-is
    Tensor(Array4<f32>),
}

/// Shared call counters for a [`MockBackend`]
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    history: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockStats {
    /// Names of the trait methods called so far, in order
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, method: &str) -> usize {
        self.history().iter().filter(|m| *m == method).count()
    }

    /// Highest number of `infer` calls observed running at once
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, method: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.push(method.to_string());
        }
    }
}

/// Mock inference backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    output: MockOutput,
    delay: Duration,
    should_fail_init: bool,
    should_fail_inference: bool,
    stats: MockStats,
}

impl MockBackend {
    /// Create a new mock backend producing a circular mask
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            output: MockOutput::Circle,
            delay: Duration::ZERO,
            should_fail_init: false,
            should_fail_inference: false,
            stats: MockStats::default(),
        }
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::new();
        backend.should_fail_inference = true;
        backend
    }

    #[must_use]
    pub fn with_output(mut self, output: MockOutput) -> Self {
        self.output = output;
        self
    }

    /// Sleep this long inside every `infer` call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handle to the call counters
    #[must_use]
    pub fn stats(&self) -> MockStats {
        self.stats.clone()
    }

    fn generate_output(&self) -> Array4<f32> {
        let (n, c, h, w) = MODEL_OUTPUT_SHAPE;
        match &self.output {
            MockOutput::Constant(value) => Array4::from_elem((n, c, h, w), *value),
            MockOutput::Tensor(tensor) => tensor.clone(),
            MockOutput::Circle => {
                let center_x = w as f32 / 2.0;
                let center_y = h as f32 / 2.0;
                let radius = w.min(h) as f32 / 3.0;
                Array4::from_shape_fn((n, c, h, w), |(_, _, y, x)| {
                    let dx = x as f32 - center_x;
                    let dy = y as f32 - center_y;
                    let distance = (dx * dx + dy * dy).sqrt();
                    // raw scores that do not span the full [0, 1] range
                    0.1 + 0.8 * ((radius - distance) / radius).clamp(0.0, 1.0)
                })
            },
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &ModelConfig) -> Result<Option<Duration>> {
        self.stats.record("initialize");

        if self.should_fail_init {
            return Err(CutoutError::model_init("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.stats.record("infer");

        if !self.initialized {
            return Err(CutoutError::internal("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(CutoutError::inference("Mock backend inference failed"));
        }
        if input.dim() != self.input_shape() {
            return Err(CutoutError::inference(format!(
                "Unexpected input shape {:?}",
                input.shape()
            )));
        }

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let output = self.generate_output();
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(output)
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
