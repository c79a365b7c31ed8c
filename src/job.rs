//! Job orchestration for single-image and batch operations
//!
//! A [`JobRunner`] accepts one [`OperationRequest`] at a time and runs it on a
//! spawned worker task. The caller keeps a [`JobHandle`] and receives
//! [`JobEvent`]s in order over a channel: zero or more `Progress` and
//! `Warning` events followed by exactly one terminal event.
//!
//! Batch jobs run their items sequentially. A failing item is recorded and the
//! batch moves on; only setup problems, a model that cannot be loaded, or a
//! cancellation end a batch early.

use crate::{
    codec::{with_known_extension, ImageCodec, ImageSource, OutputFormat},
    composite::composite_background,
    config::{EnhanceConfig, PipelineConfig},
    enhance::{EnhanceInput, Upscaler},
    error::{CutoutError, Result},
    segmentation::SegmentationEngine,
    services::{NoOpProgressReporter, ProcessingStage, ProgressReporter, ProgressTracker},
    temp::{TempArtifact, TempResourceTracker},
    types::{Image, Rgb},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// The pipeline a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Replace the background with transparency
    RemoveBackground,
    /// Replace the background with a solid color
    ChangeBackgroundColor(Rgb),
    /// Upscale with the external super-resolution tool
    EnhanceImage,
}

impl OperationKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RemoveBackground => "remove-background",
            Self::ChangeBackgroundColor(_) => "change-background-color",
            Self::EnhanceImage => "enhance-image",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangeBackgroundColor(color) => write!(f, "{} {color}", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

/// What to run and where results go
///
/// Immutable once built. Single requests hand the result back in memory and
/// may additionally persist it; batch requests always persist into their
/// output directory.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    sources: Vec<ImageSource>,
    operation: OperationKind,
    output_dir: Option<PathBuf>,
    batch: bool,
}

impl OperationRequest {
    #[must_use]
    pub fn single<S: Into<ImageSource>>(source: S, operation: OperationKind) -> Self {
        Self {
            sources: vec![source.into()],
            operation,
            output_dir: None,
            batch: false,
        }
    }

    #[must_use]
    pub fn batch<I, S, P>(sources: I, operation: OperationKind, output_dir: P) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ImageSource>,
        P: Into<PathBuf>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            operation,
            output_dir: Some(output_dir.into()),
            batch: true,
        }
    }

    /// Also persist a single result into `dir`, named after its source
    #[must_use]
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn sources(&self) -> &[ImageSource] {
        &self.sources
    }

    #[must_use]
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    #[must_use]
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.batch
    }
}

/// One batch item that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub source: String,
    pub message: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Outcome of a completed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub failures: Vec<ItemFailure>,
    /// Persisted files, in source order
    pub outputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Failures as `source: message` lines
    #[must_use]
    pub fn failure_report(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of a single-image job
///
/// Holds the image and a PNG copy of it in the session temp root. The PNG is
/// removed with the output unless promoted with [`persist`](Self::persist).
#[derive(Debug)]
pub struct SingleOutput {
    image: Image,
    artifact: TempArtifact,
    saved_to: Option<PathBuf>,
}

impl SingleOutput {
    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> Image {
        self.image
    }

    /// Temporary PNG holding the result
    #[must_use]
    pub fn artifact_path(&self) -> &Path {
        self.artifact.path()
    }

    /// Where the result was persisted when the request named an output directory
    #[must_use]
    pub fn saved_to(&self) -> Option<&Path> {
        self.saved_to.as_deref()
    }

    /// Encode to the format implied by the extension of `path`
    ///
    /// `.png` is appended when the extension is missing or unsupported.
    /// Returns the path actually written.
    ///
    /// # Errors
    /// - Encoding or I/O failures
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = with_known_extension(path.as_ref());
        ImageCodec::save(&self.image, &path)?;
        log::info!("💾 Saved result to {}", path.display());
        Ok(path)
    }

    /// Move the temporary PNG to `destination` and keep it
    ///
    /// # Errors
    /// - The file cannot be moved
    pub fn persist<P: AsRef<Path>>(self, destination: P) -> Result<PathBuf> {
        self.artifact.promote_to(destination)
    }
}

/// Result delivered with [`JobEvent::Completed`]
#[derive(Debug)]
pub enum JobResult {
    Single(SingleOutput),
    Batch(BatchSummary),
}

impl JobResult {
    #[must_use]
    pub fn as_single(&self) -> Option<&SingleOutput> {
        match self {
            Self::Single(output) => Some(output),
            Self::Batch(_) => None,
        }
    }

    #[must_use]
    pub fn as_batch(&self) -> Option<&BatchSummary> {
        match self {
            Self::Batch(summary) => Some(summary),
            Self::Single(_) => None,
        }
    }
}

/// Message from a job's worker to its handle
#[derive(Debug)]
pub enum JobEvent {
    /// Percentage complete, 0-100
    Progress(u8),
    /// Items that failed in an otherwise completed batch
    Warning(Vec<ItemFailure>),
    Completed(JobResult),
    Failed(String),
    Cancelled,
}

impl JobEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Cancelled)
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Terminal outcome returned by [`JobHandle::wait`]
#[derive(Debug)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed(String),
    Cancelled,
}

impl JobOutcome {
    #[must_use]
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed(_) => JobState::Completed,
            Self::Failed(_) => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
        }
    }

    #[must_use]
    pub fn into_result(self) -> Option<JobResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Failed(_) | Self::Cancelled => None,
        }
    }

    fn into_event(self) -> JobEvent {
        match self {
            Self::Completed(result) => JobEvent::Completed(result),
            Self::Failed(message) => JobEvent::Failed(message),
            Self::Cancelled => JobEvent::Cancelled,
        }
    }
}

/// Caller's side of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel: CancellationToken,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event in emission order; `None` once the terminal event was taken
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Request cancellation
    ///
    /// A running upscaler is terminated; a batch stops before its next item.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this job, for wiring to signal handlers
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Drain remaining events and return the terminal outcome
    pub async fn wait(mut self) -> JobOutcome {
        while let Some(event) = self.events.recv().await {
            match event {
                JobEvent::Completed(result) => return JobOutcome::Completed(result),
                JobEvent::Failed(message) => return JobOutcome::Failed(message),
                JobEvent::Cancelled => return JobOutcome::Cancelled,
                JobEvent::Progress(_) | JobEvent::Warning(_) => {},
            }
        }
        JobOutcome::Failed("Job worker stopped without reporting an outcome".to_string())
    }
}

/// Clears the runner's busy flag when the worker ends, including by panic
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs operation requests one at a time
#[derive(Clone)]
pub struct JobRunner {
    engine: SegmentationEngine,
    upscaler: Upscaler,
    enhance: Arc<EnhanceConfig>,
    temp: TempResourceTracker,
    reporter: Arc<dyn ProgressReporter>,
    active: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<watch::Receiver<JobState>>>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("engine", &self.engine)
            .field("upscaler", &self.upscaler.tool())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    #[must_use]
    pub fn new(
        engine: SegmentationEngine,
        enhance: &EnhanceConfig,
        temp: TempResourceTracker,
    ) -> Self {
        Self {
            engine,
            upscaler: Upscaler::new(enhance, temp.clone()),
            enhance: Arc::new(enhance.clone()),
            temp,
            reporter: Arc::new(NoOpProgressReporter),
            active: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build the engine, upscaler and session temp root from configuration
    ///
    /// The model is not loaded until the first job needs it.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - The configured backend is not compiled in
    /// - The session temp root cannot be created
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let temp = TempResourceTracker::new(config.temp_root.as_deref())?;
        let engine = SegmentationEngine::from_config(&config.model)?;
        Ok(Self::new(engine, &config.enhance, temp))
    }

    /// Receive stage-level progress alongside job events
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn engine(&self) -> &SegmentationEngine {
        &self.engine
    }

    #[must_use]
    pub fn temp(&self) -> &TempResourceTracker {
        &self.temp
    }

    /// Whether a job is currently running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// State of the most recently submitted job, `Idle` before the first
    #[must_use]
    pub fn state(&self) -> JobState {
        self.latest
            .lock()
            .ok()
            .and_then(|latest| latest.as_ref().map(|rx| *rx.borrow()))
            .unwrap_or_default()
    }

    /// Start `request` on a worker task
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - [`CutoutError::JobRejected`] while another job is running
    pub fn submit(&self, request: OperationRequest) -> Result<JobHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("⚠️ Rejected {} job: another job is running", request.operation());
            return Err(CutoutError::JobRejected(
                "another job is already running".to_string(),
            ));
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(JobState::Running);
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(state_rx.clone());
        }

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let runner = self.clone();
        tokio::spawn(async move {
            let outcome = runner.run(id, request, &worker_cancel, &event_tx).await;
            state_tx.send_replace(outcome.state());
            // the flag must be clear before the caller can observe the terminal event
            drop(guard);
            let _ = event_tx.send(outcome.into_event());
        });

        Ok(JobHandle {
            id,
            events: event_rx,
            cancel,
            state: state_rx,
        })
    }

    #[instrument(
        skip_all,
        fields(job = id, operation = request.operation().name(), items = request.sources().len())
    )]
    async fn run(
        &self,
        id: u64,
        request: OperationRequest,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<JobEvent>,
    ) -> JobOutcome {
        let mut progress = ProgressTracker::new(Arc::clone(&self.reporter));
        log::info!(
            "🚀 Job {id}: {} on {} source(s)",
            request.operation(),
            request.sources().len()
        );

        let result = if request.is_batch() {
            self.run_batch(&request, cancel, events, &mut progress)
                .await
                .map(JobResult::Batch)
        } else {
            self.run_single(&request, cancel, events, &mut progress)
                .await
                .map(JobResult::Single)
        };

        match result {
            Ok(result) => {
                progress.report_completion();
                JobOutcome::Completed(result)
            },
            Err(CutoutError::Cancelled) => {
                log::info!("⏹️ Job {id} cancelled");
                JobOutcome::Cancelled
            },
            Err(e) => {
                progress.report_error(&e.to_string());
                JobOutcome::Failed(e.to_string())
            },
        }
    }

    async fn run_single(
        &self,
        request: &OperationRequest,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<JobEvent>,
        progress: &mut ProgressTracker,
    ) -> Result<SingleOutput> {
        let source = request
            .sources()
            .first()
            .ok_or_else(|| CutoutError::invalid_input("No source image"))?;
        if cancel.is_cancelled() {
            return Err(CutoutError::Cancelled);
        }

        let operation = request.operation();
        let image = if operation == OperationKind::EnhanceImage {
            emit(events, JobEvent::Progress(10));
            let image = self
                .enhance_source(source, self.enhance.model_for(false), cancel, progress)
                .await?;
            emit(events, JobEvent::Progress(80));
            image
        } else {
            self.segment_and_composite(source, operation, progress).await?
        };

        progress.report_stage(ProcessingStage::Encoding);
        let artifact = self.temp.artifact("result", "png")?;
        let target = request
            .output_dir()
            .map(|dir| output_path_for(dir, source, operation, &image))
            .transpose()?;
        let (image, artifact, saved_to) = blocking("result encoding", move || {
            ImageCodec::save(&image, artifact.path())?;
            if let Some(target) = &target {
                ImageCodec::save(&image, target)?;
            }
            Ok((image, artifact, target))
        })
        .await?;
        if let Some(path) = &saved_to {
            progress.report_stage(ProcessingStage::FileSaving);
            log::info!("💾 Saved {}", path.display());
        }

        emit(events, JobEvent::Progress(100));
        Ok(SingleOutput {
            image,
            artifact,
            saved_to,
        })
    }

    async fn run_batch(
        &self,
        request: &OperationRequest,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<JobEvent>,
        progress: &mut ProgressTracker,
    ) -> Result<BatchSummary> {
        let started_at = Utc::now();
        progress.report_stage(ProcessingStage::BatchInitialization);

        let output_dir = request
            .output_dir()
            .ok_or_else(|| CutoutError::invalid_input("Batch jobs need an output directory"))?;
        let total = request.sources().len();
        if total == 0 {
            return Err(CutoutError::invalid_input("Batch has no source images"));
        }
        std::fs::create_dir_all(output_dir)
            .map_err(|e| CutoutError::file_io_error("create output directory", output_dir, &e))?;

        let operation = request.operation();
        let model = self.enhance.model_for(true);
        let mut outputs = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, source) in request.sources().iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("⏹️ Batch stopped before item {}/{total}", index + 1);
                return Err(CutoutError::Cancelled);
            }
            progress.report_batch_item(index, total, &source.name());

            match self
                .process_batch_item(source, operation, output_dir, model, cancel, progress)
                .await
            {
                Ok(path) => outputs.push(path),
                Err(CutoutError::Cancelled) => return Err(CutoutError::Cancelled),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("⚠️ {}: {e}", source.name());
                    failures.push(ItemFailure {
                        source: source.name(),
                        message: e.to_string(),
                    });
                },
            }
            emit(events, JobEvent::Progress(batch_progress(index + 1, total)));
        }

        progress.report_stage(ProcessingStage::BatchFinalization);
        if !failures.is_empty() {
            log::warn!("⚠️ {} of {total} item(s) failed", failures.len());
            emit(events, JobEvent::Warning(failures.clone()));
        }
        log::info!(
            "✅ Batch finished: {}/{total} saved to {}",
            outputs.len(),
            output_dir.display()
        );

        Ok(BatchSummary {
            total,
            processed: outputs.len(),
            failures,
            outputs,
            output_dir: output_dir.to_path_buf(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn process_batch_item(
        &self,
        source: &ImageSource,
        operation: OperationKind,
        output_dir: &Path,
        model: Option<&str>,
        cancel: &CancellationToken,
        progress: &mut ProgressTracker,
    ) -> Result<PathBuf> {
        let image = if operation == OperationKind::EnhanceImage {
            self.enhance_source(source, model, cancel, progress).await?
        } else {
            self.segment_and_composite(source, operation, progress)
                .await?
        };

        let target = output_path_for(output_dir, source, operation, &image)?;
        progress.report_stage(ProcessingStage::FileSaving);
        blocking("saving", move || {
            ImageCodec::save(&image, &target)?;
            Ok(target)
        })
        .await
    }

    async fn segment_and_composite(
        &self,
        source: &ImageSource,
        operation: OperationKind,
        progress: &mut ProgressTracker,
    ) -> Result<Image> {
        progress.report_stage(ProcessingStage::ImageLoading);
        let owned = source.clone();
        let image = blocking("decoding", move || ImageCodec::decode_source(&owned)).await?;

        if !self.engine.is_initialized() {
            progress.report_stage(ProcessingStage::ModelLoading);
        }
        progress.report_stage(ProcessingStage::Segmentation);
        let engine = self.engine.clone();
        let cutout = blocking("segmentation", move || engine.remove_background(&image)).await?;

        match operation {
            OperationKind::ChangeBackgroundColor(color) => {
                progress.report_stage(ProcessingStage::Compositing);
                blocking("compositing", move || composite_background(&cutout, color)).await
            },
            OperationKind::RemoveBackground | OperationKind::EnhanceImage => Ok(cutout),
        }
    }

    /// Upscale a source; files go to the tool directly, in-memory sources are decoded first
    async fn enhance_source(
        &self,
        source: &ImageSource,
        model: Option<&str>,
        cancel: &CancellationToken,
        progress: &mut ProgressTracker,
    ) -> Result<Image> {
        progress.report_stage(ProcessingStage::Enhancement);
        match source {
            ImageSource::Path(path) => {
                self.upscaler
                    .enhance(EnhanceInput::Path(path), model, cancel)
                    .await
            },
            ImageSource::Memory { .. } => {
                let owned = source.clone();
                let image =
                    blocking("decoding", move || ImageCodec::decode_source(&owned)).await?;
                self.upscaler
                    .enhance(EnhanceInput::Image(&image), model, cancel)
                    .await
            },
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<JobEvent>, event: JobEvent) {
    if events.send(event).is_err() {
        log::debug!("Job handle dropped, event discarded");
    }
}

async fn blocking<T, F>(label: &'static str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CutoutError::internal(format!("{label} task failed: {e}")))?
}

/// `floor(done * 100 / total)`
fn batch_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(done.min(total) * 100 / total).unwrap_or(100)
}

/// Output file for `source` inside `dir`
///
/// Keeps the source base name. Enhancement always writes PNG, a transparent
/// result never lands in a format without alpha, and unknown extensions get
/// `.png` appended.
fn output_path_for(
    dir: &Path,
    source: &ImageSource,
    operation: OperationKind,
    image: &Image,
) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        CutoutError::invalid_input(format!("'{}' has no file name", source.name()))
    })?;
    let path = dir.join(name);

    if operation == OperationKind::EnhanceImage {
        return Ok(path.with_extension("png"));
    }
    Ok(match OutputFormat::from_path(&path) {
        Some(format) if !format.supports_transparency() && image.has_transparency() => {
            path.with_extension("png")
        },
        Some(_) => path,
        None => with_known_extension(&path),
    })
}
