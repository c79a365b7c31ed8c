//! ONNX Runtime backend for the segmentation model
//!
//! Loads the model file into an `ort` session with the configured execution
//! provider and thread counts. Hardware providers that are unavailable fall
//! back to CPU with a warning.

use crate::config::{ExecutionProvider, ModelConfig};
use crate::error::{CutoutError, Result};
use crate::inference::{into_array4, InferenceBackend};
use crate::utils::ModelValidator;
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;

/// ONNX Runtime backend
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    initialized: bool,
}

impl OnnxBackend {
    /// Create a new uninitialized ONNX backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn configure_providers(
        builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let provider_error =
            |e: ort::Error| CutoutError::model_init(format!("Failed to set execution provider: {e}"));

        let cuda = CUDAExecutionProvider::default();
        let coreml = CoreMLExecutionProvider::default();
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        match provider {
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Ok(builder)
            },
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(cuda.build());
                }
                if coreml_available {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(coreml.with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::debug!("No hardware acceleration available, using CPU");
                    Ok(builder)
                } else {
                    builder.with_execution_providers(providers).map_err(provider_error)
                }
            },
            ExecutionProvider::Cuda if cuda_available => builder
                .with_execution_providers([cuda.build()])
                .map_err(provider_error),
            ExecutionProvider::CoreMl if coreml_available => builder
                .with_execution_providers([coreml.with_subgraphs(true).build()])
                .map_err(provider_error),
            ExecutionProvider::Cuda | ExecutionProvider::CoreMl => {
                log::warn!(
                    "⚠️ {provider} execution provider requested but not available, falling back to CPU"
                );
                Ok(builder)
            },
        }
    }

    /// Load and initialize the ONNX model
    fn load_model(&mut self, config: &ModelConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let path = config.path.as_path();
        let size_bytes = ModelValidator::validate_model_path(path)?;

        let builder = Session::builder()
            .map_err(|e| {
                CutoutError::model_init(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                CutoutError::model_init(format!("Failed to set optimization level: {e}"))
            })?;
        let builder = Self::configure_providers(builder, config.execution_provider)?;

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| CutoutError::model_init(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| CutoutError::model_init(format!("Failed to set inter threads: {e}")))?
            .commit_from_file(path)
            .map_err(|e| {
                CutoutError::model_error_with_context(
                    "load",
                    path,
                    &e.to_string(),
                    &["verify the file is a U²-Net-p ONNX export"],
                )
            })?;

        log::debug!("✅ ONNX Runtime session created");
        log::debug!("  - Requested provider: {}", config.execution_provider);
        log::debug!(
            "  - Threading: {intra_threads} intra-op threads, {inter_threads} inter-op threads"
        );
        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for logging display
        let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
        log::debug!("  - Model: {} ({size_mb:.2} MB)", path.display());

        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &ModelConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(CutoutError::internal("Backend not initialized"));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CutoutError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| CutoutError::inference(format!("Failed to convert input tensor: {e}")))?;

        // positional inputs, the model's tensor names are not relied on
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| CutoutError::inference(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| CutoutError::inference("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| CutoutError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| CutoutError::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output_tensor.shape().to_vec();
        let result = into_array4(
            &shape,
            output_tensor.to_owned().into_raw_vec_and_offset().0,
        )?;

        log::debug!(
            "📊 Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "onnx"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
