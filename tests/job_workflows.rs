//! End-to-end job workflows on the mock backend
//!
//! No model file is needed; the mock backend produces a deterministic
//! circular saliency map.

use photo_cutout::{
    BatchSummary, EnhanceConfig, Image, ImageCodec, ImageSource, JobEvent, JobOutcome, JobRunner,
    JobState, MockBackend, ModelConfig, OperationKind, OperationRequest, OutputFormat,
    PixelFormat, Rgb, SegmentationEngine, TempResourceTracker,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn runner(backend: MockBackend, temp_parent: &Path) -> JobRunner {
    init_logging();
    let engine = SegmentationEngine::new(Box::new(backend), ModelConfig::default());
    let temp = TempResourceTracker::new(Some(temp_parent)).unwrap();
    JobRunner::new(engine, &EnhanceConfig::default(), temp)
}

/// Gradient test image so every pixel differs from the background color
fn gradient(width: u32, height: u32) -> Image {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x * 7 % 200) as u8 + 20, 128, (y * 5 % 200) as u8 + 20]);
        }
    }
    Image::new(width, height, PixelFormat::Rgb8, data).unwrap()
}

/// Five inputs; the third is not an image
fn batch_inputs(dir: &Path) -> Vec<PathBuf> {
    (1..=5)
        .map(|i| {
            let path = dir.join(format!("{i}.png"));
            if i == 3 {
                std::fs::write(&path, b"this is not a png").unwrap();
            } else {
                ImageCodec::save(&gradient(48, 32), &path).unwrap();
            }
            path
        })
        .collect()
}

struct Collected {
    progress: Vec<u8>,
    warnings: Vec<Vec<String>>,
    summary: Option<BatchSummary>,
    terminal: Option<JobState>,
    after_terminal: usize,
}

async fn collect(mut handle: photo_cutout::JobHandle) -> Collected {
    let mut collected = Collected {
        progress: Vec::new(),
        warnings: Vec::new(),
        summary: None,
        terminal: None,
        after_terminal: 0,
    };
    while let Some(event) = handle.next_event().await {
        if collected.terminal.is_some() {
            collected.after_terminal += 1;
            continue;
        }
        match event {
            JobEvent::Progress(p) => collected.progress.push(p),
            JobEvent::Warning(failures) => collected
                .warnings
                .push(failures.iter().map(ToString::to_string).collect()),
            JobEvent::Completed(result) => {
                collected.summary = result.as_batch().cloned();
                collected.terminal = Some(JobState::Completed);
            },
            JobEvent::Failed(_) => collected.terminal = Some(JobState::Failed),
            JobEvent::Cancelled => collected.terminal = Some(JobState::Cancelled),
        }
    }
    collected
}

#[tokio::test]
async fn batch_with_corrupt_item_reports_progress_and_one_warning() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = batch_inputs(dir.path());
    let out = dir.path().join("out");
    let runner = runner(MockBackend::new(), dir.path());

    let handle = runner
        .submit(OperationRequest::batch(
            inputs,
            OperationKind::RemoveBackground,
            &out,
        ))
        .unwrap();
    let collected = collect(handle).await;

    assert_eq!(collected.progress, vec![20, 40, 60, 80, 100]);
    assert_eq!(collected.terminal, Some(JobState::Completed));
    assert_eq!(collected.after_terminal, 0);

    assert_eq!(collected.warnings.len(), 1);
    let warning = &collected.warnings[0];
    assert_eq!(warning.len(), 1);
    assert!(warning[0].contains("3.png: "));

    let summary = collected.summary.unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failures.len(), 1);
    let names: Vec<_> = summary
        .outputs
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["1.png", "2.png", "4.png", "5.png"]);
    for output in &summary.outputs {
        let image = ImageCodec::decode_file(output).unwrap();
        assert_eq!(image.dimensions(), (48, 32));
        assert!(image.has_transparency());
    }
    assert!(!out.join("3.png").exists());
}

#[tokio::test]
async fn batch_recolor_keeps_jpeg_outputs_opaque() {
    let dir = tempfile::tempdir().unwrap();
    let inputs: Vec<PathBuf> = ["a.jpg", "b.jpg"]
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            ImageCodec::save(&gradient(40, 40), &path).unwrap();
            path
        })
        .collect();
    let out = dir.path().join("recolored");
    let runner = runner(MockBackend::new(), dir.path());

    let outcome = runner
        .submit(OperationRequest::batch(
            inputs,
            OperationKind::ChangeBackgroundColor(Rgb::new(0, 255, 0)),
            &out,
        ))
        .unwrap()
        .wait()
        .await;
    let result = outcome.into_result().unwrap();
    let summary = result.as_batch().unwrap();

    assert!(!summary.has_failures());
    assert_eq!(summary.outputs, vec![out.join("a.jpg"), out.join("b.jpg")]);
    for output in &summary.outputs {
        assert_eq!(OutputFormat::from_path(output), Some(OutputFormat::Jpeg));
        let image = ImageCodec::decode_file(output).unwrap();
        assert_eq!(image.format(), PixelFormat::Rgb8);
    }
}

#[tokio::test]
async fn batch_accepts_in_memory_sources() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = ImageCodec::encode(&gradient(20, 20), OutputFormat::Jpeg).unwrap();
    let source = ImageSource::Memory {
        name: "upload.jpg".to_string(),
        bytes,
    };
    let out = dir.path().join("out");
    let runner = runner(MockBackend::new(), dir.path());

    let outcome = runner
        .submit(OperationRequest::batch(
            [source],
            OperationKind::RemoveBackground,
            &out,
        ))
        .unwrap()
        .wait()
        .await;
    let result = outcome.into_result().unwrap();
    // transparent result cannot stay JPEG
    assert_eq!(result.as_batch().unwrap().outputs, vec![out.join("upload.png")]);
}

#[tokio::test]
async fn inference_failures_are_per_item() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = batch_inputs(dir.path());
    let runner = runner(MockBackend::new_failing_inference(), dir.path());

    let outcome = runner
        .submit(OperationRequest::batch(
            inputs,
            OperationKind::RemoveBackground,
            dir.path().join("out"),
        ))
        .unwrap()
        .wait()
        .await;
    let result = outcome.into_result().unwrap();
    let summary = result.as_batch().unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failures.len(), 5);
    assert_eq!(summary.failure_report().lines().count(), 5);
}

#[tokio::test]
async fn one_job_at_a_time_across_clones() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = batch_inputs(dir.path());
    let backend = MockBackend::new().with_delay(Duration::from_millis(50));
    let stats = backend.stats();
    let runner = runner(backend, dir.path());
    let clone = runner.clone();

    let handle = runner
        .submit(OperationRequest::batch(
            inputs.clone(),
            OperationKind::RemoveBackground,
            dir.path().join("out"),
        ))
        .unwrap();
    assert!(clone.is_busy());
    assert_eq!(clone.state(), JobState::Running);
    let rejected = clone.submit(OperationRequest::single(
        inputs[0].clone(),
        OperationKind::RemoveBackground,
    ));
    assert!(matches!(rejected, Err(photo_cutout::CutoutError::JobRejected(_))));

    assert_eq!(handle.wait().await.state(), JobState::Completed);
    assert_eq!(clone.state(), JobState::Completed);
    assert_eq!(stats.count("infer"), 4);
    assert_eq!(stats.peak_concurrency(), 1);
    // model is loaded once for the whole batch
    assert_eq!(stats.count("initialize"), 1);
}

#[tokio::test]
async fn single_result_artifact_is_removed_unless_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("portrait.png");
    ImageCodec::save(&gradient(30, 30), &input).unwrap();
    let runner = runner(MockBackend::new(), dir.path());

    let outcome = runner
        .submit(OperationRequest::single(&*input, OperationKind::RemoveBackground))
        .unwrap()
        .wait()
        .await;
    let Some(photo_cutout::JobResult::Single(output)) = outcome.into_result() else {
        panic!("expected a single result");
    };
    let artifact = output.artifact_path().to_path_buf();
    assert!(artifact.is_file());
    drop(output);
    assert!(!artifact.exists());

    let outcome = runner
        .submit(OperationRequest::single(&*input, OperationKind::RemoveBackground))
        .unwrap()
        .wait()
        .await;
    let Some(photo_cutout::JobResult::Single(output)) = outcome.into_result() else {
        panic!("expected a single result");
    };
    let kept = output.persist(dir.path().join("kept.png")).unwrap();
    assert!(kept.is_file());
    assert!(runner.temp().tracked().is_empty());
}

#[tokio::test]
async fn missing_single_source_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(MockBackend::new(), dir.path());

    let outcome = runner
        .submit(OperationRequest::single(
            dir.path().join("missing.png"),
            OperationKind::RemoveBackground,
        ))
        .unwrap()
        .wait()
        .await;
    match outcome {
        JobOutcome::Failed(message) => assert!(message.contains("missing.png")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!runner.is_busy());
}

#[tokio::test]
async fn dropping_the_runner_clears_temp_root() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("x.png");
    ImageCodec::save(&gradient(10, 10), &input).unwrap();

    let root = {
        let runner = runner(MockBackend::new(), dir.path());
        let root = runner.temp().root().unwrap();
        let outcome = runner
            .submit(OperationRequest::single(&*input, OperationKind::RemoveBackground))
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome.state(), JobState::Completed);
        drop(outcome);
        root
    };
    // the worker task releases its clone shortly after the terminal event
    for _ in 0..100 {
        if !root.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!root.exists());
}
