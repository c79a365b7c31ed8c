//! External super-resolution invocation
//!
//! Runs a `realesrgan-ncnn-vulkan` compatible executable as
//! `<tool> -i <input> -o <output> [-n <model>]` inside a fresh scoped work
//! directory and decodes the PNG it writes. The work directory is removed on
//! every exit path. Cancellation sends a graceful terminate, waits for the
//! configured grace period, then kills the child and reaps it.

use crate::{
    codec::ImageCodec,
    config::EnhanceConfig,
    error::{CutoutError, Result},
    temp::TempResourceTracker,
    types::Image,
};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// File name the tool is asked to write inside the work directory
pub const OUTPUT_FILE_NAME: &str = "enhanced.png";

const STDERR_TAIL_CHARS: usize = 400;

/// What to upscale
#[derive(Debug, Clone, Copy)]
pub enum EnhanceInput<'a> {
    /// Existing image file, passed to the tool as-is
    Path(&'a Path),
    /// In-memory image, written as PNG into the work directory first
    Image(&'a Image),
}

/// Handle to the external upscaler
#[derive(Debug, Clone)]
pub struct Upscaler {
    tool: PathBuf,
    termination_grace: Duration,
    temp: TempResourceTracker,
}

impl Upscaler {
    #[must_use]
    pub fn new(config: &EnhanceConfig, temp: TempResourceTracker) -> Self {
        Self {
            tool: config.tool_path.clone(),
            termination_grace: config.termination_grace(),
            temp,
        }
    }

    #[must_use]
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    fn tool_name(&self) -> String {
        self.tool
            .file_name()
            .map_or_else(|| self.tool.display().to_string(), |n| n.to_string_lossy().into_owned())
    }

    fn tool_error<D: Into<String>>(&self, detail: D) -> CutoutError {
        CutoutError::external_tool(self.tool_name(), detail)
    }

    /// Paths with a directory component must exist; bare names are looked up on `PATH` at spawn
    fn check_tool(&self) -> Result<()> {
        let has_dir = self.tool.is_absolute() || self.tool.components().count() > 1;
        if has_dir && !self.tool.is_file() {
            return Err(self.tool_error(format!("not found at {}", self.tool.display())));
        }
        Ok(())
    }

    /// Upscale `input`, optionally selecting a tool model with `-n`
    ///
    /// # Errors
    /// - [`CutoutError::ExternalTool`] when the tool is missing, fails to start,
    ///   exits non-zero or writes no readable output
    /// - [`CutoutError::Decode`] when an input path cannot be read
    /// - [`CutoutError::Cancelled`] when `cancel` fires before the tool exits
    #[instrument(skip(self, input, cancel), fields(tool = %self.tool.display()))]
    pub async fn enhance(
        &self,
        input: EnhanceInput<'_>,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Image> {
        self.check_tool()?;
        if cancel.is_cancelled() {
            return Err(CutoutError::Cancelled);
        }

        let work = self.temp.scoped_dir("enhance")?;
        let input_path = match input {
            EnhanceInput::Path(path) => {
                if !path.is_file() {
                    return Err(CutoutError::Decode {
                        source_name: path.display().to_string(),
                        message: "file does not exist".to_string(),
                    });
                }
                path.to_path_buf()
            },
            EnhanceInput::Image(image) => {
                let path = work.join("input.png");
                let image = image.clone();
                let target = path.clone();
                tokio::task::spawn_blocking(move || ImageCodec::save(&image, &target))
                    .await
                    .map_err(|e| CutoutError::internal(format!("Input encoding task failed: {e}")))??;
                path
            },
        };
        let output_path = work.join(OUTPUT_FILE_NAME);

        let mut command = Command::new(&self.tool);
        command
            .arg("-i")
            .arg(&input_path)
            .arg("-o")
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = model {
            command.arg("-n").arg(model);
        }

        log::debug!(
            "Running {} -i {} -o {}{}",
            self.tool.display(),
            input_path.display(),
            output_path.display(),
            model.map(|m| format!(" -n {m}")).unwrap_or_default()
        );
        let mut child = command
            .spawn()
            .map_err(|e| self.tool_error(format!("failed to start: {e}")))?;

        let stdout = child.stdout.take().map(collect_output);
        let stderr = child.stderr.take().map(collect_output);

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| self.tool_error(format!("wait failed: {e}")))?,
            () = cancel.cancelled() => {
                self.terminate(&mut child).await;
                log::info!("⏹️ Enhancement cancelled");
                return Err(CutoutError::Cancelled);
            }
        };

        let stdout = join_output(stdout).await;
        let stderr = join_output(stderr).await;
        if !stdout.trim().is_empty() {
            log::debug!("{} stdout: {}", self.tool_name(), stdout.trim());
        }
        if !stderr.trim().is_empty() {
            log::debug!("{} stderr: {}", self.tool_name(), stderr.trim());
        }

        if !status.success() {
            return Err(self.tool_error(failure_detail(status, &stderr)));
        }
        if !output_path.is_file() {
            return Err(self.tool_error(format!(
                "exited successfully but wrote no {OUTPUT_FILE_NAME}"
            )));
        }

        let decode_path = output_path.clone();
        let image = tokio::task::spawn_blocking(move || ImageCodec::decode_file(&decode_path))
            .await
            .map_err(|e| CutoutError::internal(format!("Output decoding task failed: {e}")))?
            .map_err(|e| self.tool_error(format!("unreadable output: {e}")))?;

        log::info!(
            "✨ Enhanced to {}x{}",
            image.width(),
            image.height()
        );
        Ok(image)
    }

    /// Graceful terminate, bounded wait, then kill
    ///
    /// When the terminate signal cannot be delivered the child is killed
    /// straight away instead of waiting out the grace period.
    async fn terminate(&self, child: &mut Child) {
        if !send_terminate(child).await {
            force_kill(child).await;
            return;
        }

        match tokio::time::timeout(self.termination_grace, child.wait()).await {
            Ok(Ok(status)) => log::debug!("Upscaler exited after terminate: {status}"),
            Ok(Err(e)) => log::debug!("Waiting for terminated upscaler failed: {e}"),
            Err(_) => {
                log::warn!(
                    "Upscaler still running after {}ms, killing it",
                    self.termination_grace.as_millis()
                );
                force_kill(child).await;
            },
        }
    }
}

async fn force_kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        log::debug!("Kill failed: {e}");
    }
    if let Err(e) = child.wait().await {
        log::debug!("Reaping killed upscaler failed: {e}");
    }
}

#[cfg(unix)]
async fn send_terminate(child: &Child) -> bool {
    match child.id() {
        Some(pid) => signal_terminate("kill", pid).await,
        None => false,
    }
}

/// Send SIGTERM to `pid` through the `kill` utility at `program`
///
/// Returns whether the signal was delivered.
#[cfg(unix)]
async fn signal_terminate(program: &str, pid: u32) -> bool {
    let sent = Command::new(program)
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match sent {
        Ok(status) if status.success() => true,
        Ok(status) => {
            log::warn!("⚠️ `{program} -TERM {pid}` failed with {status}, killing the upscaler");
            false
        },
        Err(e) => {
            log::warn!("⚠️ Could not run `{program}` to terminate upscaler {pid}: {e}, killing it");
            false
        },
    }
}

// No graceful signal off unix.
#[cfg(not(unix))]
async fn send_terminate(_child: &Child) -> bool {
    false
}

fn collect_output<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer).await;
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

async fn join_output(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

fn failure_detail(status: ExitStatus, stderr: &str) -> String {
    let code = status
        .code()
        .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit status {c}"));
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return code;
    }
    let tail: String = {
        let chars: Vec<char> = stderr.chars().collect();
        let start = chars.len().saturating_sub(STDERR_TAIL_CHARS);
        chars.get(start..).map(|c| c.iter().collect()).unwrap_or_default()
    };
    format!("{code}: {tail}")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::Rgb;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn upscaler(tool: PathBuf, temp: &TempResourceTracker) -> Upscaler {
        let config = EnhanceConfig {
            tool_path: tool,
            termination_grace_ms: 200,
            ..EnhanceConfig::default()
        };
        Upscaler::new(&config, temp.clone())
    }

    #[tokio::test]
    async fn test_successful_enhancement_passes_model_flag() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args.txt");
        let tool = script(
            dir.path(),
            "fake-upscaler",
            &format!("echo \"$@\" > '{}'\ncp \"$2\" \"$4\"", args_file.display()),
        );
        let temp = TempResourceTracker::new(Some(dir.path())).unwrap();
        let image = Image::filled(4, 3, Rgb::new(1, 2, 3)).unwrap();

        let result = upscaler(tool, &temp)
            .enhance(
                EnhanceInput::Image(&image),
                Some("realesrgan-x4plus-anime"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result, image);
        let args = std::fs::read_to_string(&args_file).unwrap();
        assert!(args.starts_with("-i "));
        assert!(args.contains(" -o "));
        assert!(args.trim_end().ends_with("-n realesrgan-x4plus-anime"));
        assert!(temp.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "broken", "echo 'vkCreateInstance failed' >&2\nexit 3");
        let temp = TempResourceTracker::new(Some(dir.path())).unwrap();
        let image = Image::filled(2, 2, Rgb::WHITE).unwrap();

        let err = upscaler(tool, &temp)
            .enhance(EnhanceInput::Image(&image), None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            CutoutError::ExternalTool { tool, detail } => {
                assert_eq!(tool, "broken");
                assert!(detail.contains("exit status 3"));
                assert!(detail.contains("vkCreateInstance failed"));
            },
            other => panic!("expected external tool error, got {other:?}"),
        }
        assert!(temp.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_missing_output_is_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "lazy", "exit 0");
        let temp = TempResourceTracker::new(Some(dir.path())).unwrap();
        let image = Image::filled(2, 2, Rgb::WHITE).unwrap();

        let err = upscaler(tool, &temp)
            .enhance(EnhanceInput::Image(&image), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CutoutError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let temp = TempResourceTracker::new(Some(dir.path())).unwrap();
        let image = Image::filled(2, 2, Rgb::WHITE).unwrap();

        let err = upscaler(dir.path().join("does-not-exist"), &temp)
            .enhance(EnhanceInput::Image(&image), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CutoutError::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let tool = script(dir.path(), "marker", &format!("touch '{}'", marker.display()));
        let temp = TempResourceTracker::new(Some(dir.path())).unwrap();
        let image = Image::filled(2, 2, Rgb::WHITE).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = upscaler(tool, &temp)
            .enhance(EnhanceInput::Image(&image), None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_terminate_reports_undeliverable_signal() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();

        assert!(!signal_terminate("/nonexistent/kill", pid).await);
        assert!(child.try_wait().unwrap().is_none());

        assert!(signal_terminate("kill", pid).await);
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_failure_detail_tail() {
        let long = "x".repeat(1000);
        let status = std::process::Command::new("sh")
            .args(["-c", "exit 2"])
            .status()
            .unwrap();
        let detail = failure_detail(status, &long);
        assert!(detail.starts_with("exit status 2: "));
        assert_eq!(detail.len(), "exit status 2: ".len() + STDERR_TAIL_CHARS);
    }
}
