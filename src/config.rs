//! Configuration types for the cutout pipeline

use crate::error::{CutoutError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default segmentation model file name
pub const DEFAULT_MODEL_FILE: &str = "u2netp.onnx";

/// Default upscaler executable name
pub const DEFAULT_UPSCALER: &str = "realesrgan-ncnn-vulkan";

/// Model passed with `-n` for single-image enhancement
pub const DEFAULT_INTERACTIVE_MODEL: &str = "realesrgan-x4plus-anime";

/// Grace period between terminate and kill when cancelling the upscaler
pub const DEFAULT_TERMINATION_GRACE_MS: u64 = 3000;

const MAX_TERMINATION_GRACE_MS: u64 = 60_000;
const MAX_THREADS: usize = 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Inference engine used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime (C++ runtime, optional GPU providers)
    #[default]
    Onnx,
    /// Tract (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = CutoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(CutoutError::invalid_config(format!(
                "Unknown backend '{other}' (expected onnx or tract)"
            ))),
        }
    }
}

/// Resolve `file_name` next to the running executable, falling back to the bare name
fn beside_executable(file_name: &str) -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(file_name)))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

/// Segmentation model settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the U²-Net-p ONNX file
    pub path: PathBuf,

    /// Inference engine
    pub backend: BackendType,

    /// Execution provider for ONNX Runtime (ignored by Tract)
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: beside_executable(DEFAULT_MODEL_FILE),
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

/// External upscaler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Upscaler executable
    pub tool_path: PathBuf,

    /// `-n` model for single-image jobs, `None` omits the flag
    pub interactive_model: Option<String>,

    /// `-n` model for batch jobs, `None` omits the flag
    pub batch_model: Option<String>,

    /// Milliseconds to wait after a graceful terminate before killing the tool
    pub termination_grace_ms: u64,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            tool_path: beside_executable(DEFAULT_UPSCALER),
            interactive_model: Some(DEFAULT_INTERACTIVE_MODEL.to_string()),
            batch_model: None,
            termination_grace_ms: DEFAULT_TERMINATION_GRACE_MS,
        }
    }
}

impl EnhanceConfig {
    #[must_use]
    pub fn termination_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.termination_grace_ms)
    }

    /// Model name for the given job mode
    #[must_use]
    pub fn model_for(&self, batch: bool) -> Option<&str> {
        if batch {
            self.batch_model.as_deref()
        } else {
            self.interactive_model.as_deref()
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub enhance: EnhanceConfig,

    /// Parent directory for the session's temporary files (system temp dir if unset)
    pub temp_root: Option<PathBuf>,
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use photo_cutout::{BackendType, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .model_path("models/u2netp.onnx")
    ///     .backend(BackendType::Tract)
    ///     .termination_grace_ms(500)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.enhance.termination_grace_ms, 500);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a JSON configuration file; missing fields take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON or failed validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CutoutError::file_io_error("read configuration", path, &e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            CutoutError::invalid_config(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Empty model or tool path
    /// - Thread counts above the supported maximum
    /// - Termination grace outside 1-60000 ms
    /// - Empty model names
    pub fn validate(&self) -> Result<()> {
        if self.model.path.as_os_str().is_empty() {
            return Err(CutoutError::invalid_config("Model path must not be empty"));
        }
        if self.enhance.tool_path.as_os_str().is_empty() {
            return Err(CutoutError::invalid_config(
                "Upscaler tool path must not be empty",
            ));
        }
        for (name, threads) in [
            ("intra threads", self.model.intra_threads),
            ("inter threads", self.model.inter_threads),
        ] {
            if threads > MAX_THREADS {
                return Err(CutoutError::config_value_error(
                    name,
                    threads,
                    "0-1024 (0 = auto)",
                ));
            }
        }
        if self.enhance.termination_grace_ms == 0
            || self.enhance.termination_grace_ms > MAX_TERMINATION_GRACE_MS
        {
            return Err(CutoutError::config_value_error(
                "termination grace",
                self.enhance.termination_grace_ms,
                "1-60000 ms",
            ));
        }
        for model in [&self.enhance.interactive_model, &self.enhance.batch_model]
            .into_iter()
            .flatten()
        {
            if model.trim().is_empty() {
                return Err(CutoutError::invalid_config(
                    "Upscaler model name must not be empty; omit it instead",
                ));
            }
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`]
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Start from an existing configuration, e.g. one loaded from JSON
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model.path = path.into();
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.model.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.model.execution_provider = provider;
        self
    }

    /// Set both intra and inter threads (0 = auto)
    ///
    /// Inter-op threads get half of `threads`, minimum 1.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.model.intra_threads = threads;
        self.config.model.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn upscaler_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.enhance.tool_path = path.into();
        self
    }

    #[must_use]
    pub fn interactive_model(mut self, model: Option<String>) -> Self {
        self.config.enhance.interactive_model = model;
        self
    }

    #[must_use]
    pub fn batch_model(mut self, model: Option<String>) -> Self {
        self.config.enhance.batch_model = model;
        self
    }

    #[must_use]
    pub fn termination_grace_ms(mut self, millis: u64) -> Self {
        self.config.enhance.termination_grace_ms = millis;
        self
    }

    #[must_use]
    pub fn temp_root<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.temp_root = Some(dir.into());
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
