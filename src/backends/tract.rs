//! Tract backend for the segmentation model
//!
//! Pure Rust inference with no native runtime to ship, at the cost of CPU-only
//! execution. Execution provider and thread settings are ignored.

use crate::config::ModelConfig;
use crate::error::{CutoutError, Result};
use crate::inference::{into_array4, InferenceBackend, MODEL_INPUT_SHAPE};
use crate::utils::ModelValidator;
use instant::{Duration, Instant};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running the model using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    initialized: bool,
}

impl TractBackend {
    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and initialize the model using Tract
    fn load_model(&mut self, config: &ModelConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let path = config.path.as_path();
        ModelValidator::validate_model_path(path)?;

        log::info!("🚀 Initializing Tract backend with {}", path.display());

        let (n, c, h, w) = MODEL_INPUT_SHAPE;
        let model_error = |stage: &str, e: TractError| {
            CutoutError::model_error_with_context(stage, path, &e.to_string(), &[])
        };
        let model = onnx()
            .model_for_path(path)
            .map_err(|e| model_error("parse", e))?
            .with_input_fact(0, f32::fact([n, c, h, w]).into())
            .map_err(|e| model_error("configure input of", e))?
            .into_optimized()
            .map_err(|e| model_error("optimize", e))?
            .into_runnable()
            .map_err(|e| model_error("prepare", e))?;

        self.model = Some(model);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &ModelConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| CutoutError::internal("Tract model not initialized"))?;

        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| CutoutError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| CutoutError::inference("No output tensor found"))?
            .into_arc_tensor();
        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            CutoutError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let shape = output_data.shape().to_vec();
        let output_array = into_array4(
            &shape,
            output_data.to_owned().into_raw_vec_and_offset().0,
        )?;

        log::debug!(
            "✅ Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(output_array)
    }

    fn name(&self) -> &'static str {
        "tract"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
