//! Progress reporting service
//!
//! Job events carry the coarse percentage a front-end shows. Reporters sit
//! beside that channel and receive a finer stage-by-stage narrative, so a
//! front-end can label its progress display without parsing events.

use instant::Instant;

/// Stages a job moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Loading the segmentation model
    ModelLoading,
    /// Loading and decoding input image
    ImageLoading,
    /// Running the segmentation model
    Segmentation,
    /// Writing the mask or painting the new background
    Compositing,
    /// Waiting on the external upscaler
    Enhancement,
    /// Encoding the result
    Encoding,
    /// Saving result to file
    FileSaving,
    /// Processing completed
    Completed,

    // Batch processing stages
    /// Preparing the output directory
    BatchInitialization,
    /// Processing individual item in batch
    BatchItemProcessing,
    /// Writing the batch summary
    BatchFinalization,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ModelLoading => "Loading segmentation model",
            ProcessingStage::ImageLoading => "Loading input image",
            ProcessingStage::Segmentation => "Segmenting foreground",
            ProcessingStage::Compositing => "Compositing result",
            ProcessingStage::Enhancement => "Upscaling with external tool",
            ProcessingStage::Encoding => "Encoding output",
            ProcessingStage::FileSaving => "Saving result",
            ProcessingStage::Completed => "Processing completed",

            ProcessingStage::BatchInitialization => "Initializing batch processing",
            ProcessingStage::BatchItemProcessing => "Processing batch item",
            ProcessingStage::BatchFinalization => "Finalizing batch processing",
        }
    }

    /// Typical progress percentage for this stage of a single-image job
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::ModelLoading => 5,
            ProcessingStage::ImageLoading => 10,
            ProcessingStage::Segmentation => 40,
            ProcessingStage::Compositing => 70,
            ProcessingStage::Enhancement => 80,
            ProcessingStage::Encoding => 90,
            ProcessingStage::FileSaving => 95,
            ProcessingStage::Completed => 100,

            ProcessingStage::BatchInitialization => 0,
            ProcessingStage::BatchItemProcessing => 50, // Variable based on items
            ProcessingStage::BatchFinalization => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    pub progress: u8,
    pub description: String,
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self::with_description(stage, stage.description().to_string(), start_time)
    }

    #[must_use]
    pub fn with_description(
        stage: ProcessingStage,
        description: String,
        start_time: Instant,
    ) -> Self {
        Self {
            stage,
            progress: stage.progress_percentage(),
            description,
            elapsed_ms: u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Override the stage default, used for batch items
    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }
}

/// Receiver of stage-level progress
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report that the job finished after `elapsed_ms`
    fn report_completion(&self, elapsed_ms: u64);

    /// Report an error during processing
    ///
    /// # Arguments
    /// * `stage` - Stage where error occurred
    /// * `error` - Error description
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _elapsed_ms: u64) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Reporter that narrates progress through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// # Arguments
    /// * `verbose` - Include elapsed time in every line
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, elapsed_ms: u64) {
        log::info!("✅ Job completed in {elapsed_ms}ms");
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Tracks the current stage and elapsed time for one job
pub struct ProgressTracker {
    reporter: std::sync::Arc<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current_stage", &self.current_stage)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: std::sync::Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Tracker that reports nowhere
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(std::sync::Arc::new(NoOpProgressReporter))
    }

    /// Tracker that logs through [`ConsoleProgressReporter`]
    #[must_use]
    pub fn console(verbose: bool) -> Self {
        Self::new(std::sync::Arc::new(ConsoleProgressReporter::new(verbose)))
    }

    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Report one batch item, `index` counting from zero
    pub fn report_batch_item(&mut self, index: usize, total: usize, name: &str) {
        let stage = ProcessingStage::BatchItemProcessing;
        self.current_stage = Some(stage);
        let progress = if total == 0 {
            0
        } else {
            u8::try_from(index * 100 / total).unwrap_or(100)
        };
        let update = ProgressUpdate::with_description(
            stage,
            format!("Processing {}/{}: {}", index + 1, total, name),
            self.start_time,
        )
        .with_progress(progress);
        self.reporter.report_progress(update);
    }

    pub fn report_completion(&mut self) {
        self.current_stage = Some(ProcessingStage::Completed);
        self.reporter.report_completion(self.elapsed_ms());
    }

    /// Report an error against the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self
            .current_stage
            .unwrap_or(ProcessingStage::ModelLoading);
        self.reporter.report_error(stage, error);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}
