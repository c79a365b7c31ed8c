//! `photo-cutout` command-line front-end
//!
//! Maps a subcommand and its inputs onto one [`OperationRequest`], runs it
//! through a [`JobRunner`] and renders the job's events with `indicatif`.

use super::config::CliConfigBuilder;
use crate::{
    config::{BackendType, ExecutionProvider},
    job::{JobEvent, JobOutcome, JobResult, JobRunner, OperationKind, OperationRequest},
    services::{ProcessingStage, ProgressReporter, ProgressUpdate},
    tracing_config::{events, init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Extensions picked up when walking directories
const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif"];

/// Exit status after Ctrl-C, following the shell convention for SIGINT
const EXIT_CANCELLED: u8 = 130;

/// Background removal, recoloring and upscaling
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "photo-cutout")]
pub struct Cli {
    /// Operation to run
    #[arg(value_enum)]
    pub operation: CliOperation,

    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<PathBuf>,

    /// Output directory; required for more than one input
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Background color for recolor (#rrggbb, rrggbb or r,g,b) [default: white]
    #[arg(long, value_name = "COLOR")]
    pub color: Option<String>,

    /// Path to the U²-Net-p ONNX model [default: u2netp.onnx next to the executable]
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Upscaler executable [default: realesrgan-ncnn-vulkan next to the executable]
    #[arg(long, value_name = "PATH")]
    pub upscaler: Option<PathBuf>,

    /// Model passed to the upscaler with -n
    #[arg(long, value_name = "NAME")]
    pub upscale_model: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Inference backend
    #[arg(long, value_enum)]
    pub backend: Option<CliBackend>,

    /// Execution provider for the ONNX backend
    #[arg(long, value_enum)]
    pub provider: Option<CliProvider>,

    /// Number of inference threads (0 = auto)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Walk directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Only take directory entries whose file name matches this glob (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Write the batch summary as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Uncolored compact log lines
    #[arg(long)]
    pub compact: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOperation {
    /// Make the background transparent
    Remove,
    /// Replace the background with a solid color
    Recolor,
    /// Upscale with the external super-resolution tool
    Enhance,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    Onnx,
    Tract,
}

impl From<CliBackend> for BackendType {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Onnx => Self::Onnx,
            CliBackend::Tract => Self::Tract,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliProvider {
    Auto,
    Cpu,
    Cuda,
    Coreml,
}

impl From<CliProvider> for ExecutionProvider {
    fn from(provider: CliProvider) -> Self {
        match provider {
            CliProvider::Auto => Self::Auto,
            CliProvider::Cpu => Self::Cpu,
            CliProvider::Cuda => Self::Cuda,
            CliProvider::Coreml => Self::CoreMl,
        }
    }
}

/// Labels the progress bar with the current stage
struct BarReporter {
    bar: ProgressBar,
}

impl ProgressReporter for BarReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if update.stage != ProcessingStage::Completed {
            self.bar.set_message(update.description);
        }
    }

    fn report_completion(&self, elapsed_ms: u64) {
        self.bar.set_message(format!("done in {elapsed_ms}ms"));
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.bar
            .suspend(|| log::debug!("Failed during {}: {error}", stage.description()));
    }
}

pub async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _tracing = init_cli_tracing(cli.verbose, cli.compact)
        .context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli)?;
    let operation = CliConfigBuilder::operation(&cli)?;

    let span = spans::session(
        operation.name(),
        &config.model.backend.to_string(),
        cli.input.len(),
    );
    let runner = JobRunner::from_config(&config).context("Failed to set up the pipeline")?;
    let code = run(&cli, &runner, operation).instrument(span).await;
    runner.temp().drain();
    code
}

async fn run(cli: &Cli, runner: &JobRunner, operation: OperationKind) -> Result<ExitCode> {
    let files = {
        let _span = spans::input_discovery(cli.input.len(), cli.recursive).entered();
        collect_inputs(&cli.input, cli.recursive, cli.pattern.as_deref())?
    };
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(ExitCode::SUCCESS);
    }
    info!("Found {} image file(s) for {operation}", files.len());

    let (request, single_target) = plan_request(&files, cli.output.as_deref(), operation)?;
    let batch_span = request
        .output_dir()
        .filter(|_| request.is_batch())
        .map(|dir| spans::batch_processing(files.len(), dir));

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );
    let runner = runner
        .clone()
        .with_reporter(Arc::new(BarReporter { bar: bar.clone() }));

    let start = Instant::now();
    let mut handle = runner.submit(request).context("Failed to start job")?;

    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });

    let outcome = loop {
        let Some(event) = handle.next_event().await else {
            break JobOutcome::Failed("Job ended without an outcome".to_string());
        };
        match event {
            JobEvent::Progress(percent) => bar.set_position(u64::from(percent)),
            JobEvent::Warning(failures) => bar.suspend(|| {
                for failure in &failures {
                    warn!("⚠️ {failure}");
                }
            }),
            JobEvent::Completed(result) => break JobOutcome::Completed(result),
            JobEvent::Failed(message) => break JobOutcome::Failed(message),
            JobEvent::Cancelled => break JobOutcome::Cancelled,
        }
    };
    interrupt.abort();
    bar.finish_and_clear();

    let elapsed = start.elapsed().as_secs_f64();
    match outcome {
        JobOutcome::Completed(JobResult::Single(output)) => {
            let target = single_target.context("Single result without a target path")?;
            let saved = output.save_as(&target)?;
            println!("{}", saved.display());
            info!("✅ Finished in {elapsed:.2}s");
            Ok(ExitCode::SUCCESS)
        },
        JobOutcome::Completed(JobResult::Batch(summary)) => {
            let _entered = batch_span.map(tracing::Span::entered);
            info!(
                "✅ Processed {}/{} image(s) into {} in {elapsed:.2}s",
                summary.processed,
                summary.total,
                summary.output_dir.display()
            );
            if summary.has_failures() {
                events::warning_with_recommendation(
                    &format!("{} image(s) failed", summary.failures.len()),
                    "run with -v for details or pass --report FILE",
                );
            }
            if let Some(report) = &cli.report {
                let json = serde_json::to_string_pretty(&summary)
                    .context("Failed to serialize batch summary")?;
                std::fs::write(report, json)
                    .with_context(|| format!("Failed to write report {}", report.display()))?;
                info!("📝 Wrote report to {}", report.display());
            }
            Ok(ExitCode::SUCCESS)
        },
        JobOutcome::Failed(message) => {
            events::error_with_context(&message, operation.name());
            anyhow::bail!("{operation} failed: {message}")
        },
        JobOutcome::Cancelled => {
            warn!("⏹️ Cancelled after {elapsed:.2}s");
            Ok(ExitCode::from(EXIT_CANCELLED))
        },
    }
}

/// Expand arguments into image files
///
/// Files are taken as given, in argument order. Directories contribute their
/// supported images, sorted, filtered by `pattern` on the file name.
fn collect_inputs(inputs: &[PathBuf], recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .context("Invalid --pattern")?;
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let mut found = find_image_files(input, recursive, pattern.as_ref())?;
            found.sort();
            files.extend(found);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                input.display()
            );
        }
    }
    Ok(files)
}

fn find_image_files(
    dir: &Path,
    recursive: bool,
    pattern: Option<&glob::Pattern>,
) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && is_image_file(path) && matches_pattern(path, pattern) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn matches_pattern(path: &Path, pattern: Option<&glob::Pattern>) -> bool {
    match pattern {
        Some(pattern) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| pattern.matches(name)),
        None => true,
    }
}

/// Choose between a single job saved next to its input and a batch job
///
/// A single input without `-o` is a single job; everything else needs an
/// output directory.
fn plan_request(
    files: &[PathBuf],
    output: Option<&Path>,
    operation: OperationKind,
) -> Result<(OperationRequest, Option<PathBuf>)> {
    match (output, files) {
        (None, [only]) => Ok((
            OperationRequest::single(only.clone(), operation),
            Some(single_output_path(only)),
        )),
        (Some(dir), _) => Ok((OperationRequest::batch(files.to_vec(), operation, dir), None)),
        (None, _) => anyhow::bail!("{} inputs need an output directory (-o DIR)", files.len()),
    }
}

/// `<stem>_cutout.png` next to the input
fn single_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    input.with_file_name(format!("{stem}_cutout.png"))
}
