//! Session-scoped temporary files and directories
//!
//! Every temporary path the pipeline creates lives under one session root and
//! is registered with a [`TempResourceTracker`]. Artifacts remove themselves
//! when dropped unless promoted to a persisted output, scoped directories are
//! removed when their guard goes out of scope (including during unwinding),
//! and [`TempResourceTracker::drain`] or dropping the last tracker handle
//! removes whatever is left together with the root. Removal failures are
//! logged at debug level and otherwise ignored.

use crate::error::{CutoutError, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tempfile::TempDir;

#[derive(Debug)]
struct TrackerInner {
    root: Mutex<Option<TempDir>>,
    entries: Mutex<BTreeSet<PathBuf>>,
    counter: AtomicU64,
}

impl TrackerInner {
    fn register(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.to_path_buf());
        }
    }

    fn unregister(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(path);
        }
    }

    fn drain(&self) {
        let entries = self
            .entries
            .lock()
            .map(|mut entries| std::mem::take(&mut *entries))
            .unwrap_or_default();
        for path in &entries {
            remove_path(path);
        }

        let root = self.root.lock().ok().and_then(|mut root| root.take());
        if let Some(root) = root {
            let path = root.path().to_path_buf();
            if let Err(e) = root.close() {
                log::debug!("Ignoring failure to remove {}: {e}", path.display());
            } else {
                log::debug!("🧹 Removed session temp root {}", path.display());
            }
        }
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.drain();
    }
}

fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => log::debug!("🧹 Removed temporary {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => log::debug!("Ignoring failure to remove {}: {e}", path.display()),
    }
}

/// Registry of every temporary path created during a session
///
/// Cheap to clone; all clones share the same registry.
#[derive(Debug, Clone)]
pub struct TempResourceTracker {
    inner: Arc<TrackerInner>,
}

impl TempResourceTracker {
    /// Create a session root in the system temp directory, or under `parent`
    ///
    /// # Errors
    /// - The root directory cannot be created
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("photo-cutout-");
        let root = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CutoutError::file_io_error("create temp parent directory", parent, &e)
                })?;
                builder.tempdir_in(parent)
            },
            None => builder.tempdir(),
        }
        .map_err(|e| CutoutError::file_io_error("create session temp root", "<temp>", &e))?;

        log::debug!("Session temp root: {}", root.path().display());
        Ok(Self {
            inner: Arc::new(TrackerInner {
                root: Mutex::new(Some(root)),
                entries: Mutex::new(BTreeSet::new()),
                counter: AtomicU64::new(0),
            }),
        })
    }

    /// Session root, or `None` after [`drain`](Self::drain)
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.inner
            .root
            .lock()
            .ok()
            .and_then(|root| root.as_ref().map(|dir| dir.path().to_path_buf()))
    }

    /// Paths currently registered, in sorted order
    #[must_use]
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.inner
            .entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn next_path(&self, stem: &str, extension: Option<&str>) -> Result<PathBuf> {
        let root = self
            .root()
            .ok_or_else(|| CutoutError::internal("Temporary resources already drained"))?;
        let n = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let name = match extension {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        Ok(root.join(name))
    }

    /// Reserve and register a file path under the session root
    ///
    /// The file itself is not created.
    ///
    /// # Errors
    /// - The tracker has been drained
    pub fn artifact(&self, stem: &str, extension: &str) -> Result<TempArtifact> {
        let path = self.next_path(stem, Some(extension))?;
        self.inner.register(&path);
        Ok(TempArtifact {
            path,
            tracker: Arc::downgrade(&self.inner),
            armed: true,
        })
    }

    /// Create and register a fresh directory removed when the guard drops
    ///
    /// # Errors
    /// - The tracker has been drained
    /// - The directory cannot be created
    pub fn scoped_dir(&self, label: &str) -> Result<ScopedDir> {
        let path = self.next_path(label, None)?;
        std::fs::create_dir_all(&path)
            .map_err(|e| CutoutError::file_io_error("create temporary directory", &path, &e))?;
        self.inner.register(&path);
        Ok(ScopedDir {
            path,
            tracker: Arc::downgrade(&self.inner),
        })
    }

    /// Remove every registered path and the session root
    ///
    /// Safe to call more than once. Later attempts to create artifacts fail.
    pub fn drain(&self) {
        self.inner.drain();
    }
}

/// A registered temporary file path
///
/// Removed when dropped unless [`promote_to`](Self::promote_to) moved it out.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    tracker: Weak<TrackerInner>,
    armed: bool,
}

impl TempArtifact {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file currently exists on disk
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Move the file to `destination`, making it a persisted output
    ///
    /// Falls back to copy-and-delete when a rename crosses filesystems.
    ///
    /// # Errors
    /// - The artifact file does not exist or cannot be moved
    pub fn promote_to<P: AsRef<Path>>(mut self, destination: P) -> Result<PathBuf> {
        let destination = destination.as_ref();
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CutoutError::file_io_error("create output directory", parent, &e))?;
        }
        if std::fs::rename(&self.path, destination).is_err() {
            std::fs::copy(&self.path, destination).map_err(|e| {
                CutoutError::file_io_error("persist temporary file", &self.path, &e)
            })?;
            remove_path(&self.path);
        }

        self.armed = false;
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unregister(&self.path);
        }
        log::debug!(
            "Promoted {} to {}",
            self.path.display(),
            destination.display()
        );
        Ok(destination.to_path_buf())
    }

    /// Remove the file now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        remove_path(&self.path);
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unregister(&self.path);
        }
    }
}

/// Guard for a registered temporary directory
#[derive(Debug)]
pub struct ScopedDir {
    path: PathBuf,
    tracker: Weak<TrackerInner>,
}

impl ScopedDir {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        remove_path(&self.path);
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unregister(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_removed_on_drop() {
        let tracker = TempResourceTracker::new(None).unwrap();
        let artifact = tracker.artifact("preview", "png").unwrap();
        std::fs::write(artifact.path(), b"x").unwrap();
        let path = artifact.path().to_path_buf();
        assert_eq!(tracker.tracked(), vec![path.clone()]);

        artifact.release();
        assert!(!path.exists());
        assert!(tracker.tracked().is_empty());
    }

    #[test]
    fn test_promote_keeps_file() {
        let out = tempfile::tempdir().unwrap();
        let tracker = TempResourceTracker::new(None).unwrap();
        let artifact = tracker.artifact("preview", "png").unwrap();
        std::fs::write(artifact.path(), b"data").unwrap();

        let dest = out.path().join("kept").join("result.png");
        let persisted = artifact.promote_to(&dest).unwrap();
        assert!(tracker.tracked().is_empty());
        tracker.drain();
        assert_eq!(std::fs::read(persisted).unwrap(), b"data");
    }

    #[test]
    fn test_scoped_dir_removed_on_panic() {
        let tracker = TempResourceTracker::new(None).unwrap();
        let tracker_clone = tracker.clone();
        let created = std::sync::Arc::new(Mutex::new(None));
        let created_clone = created.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let dir = tracker_clone.scoped_dir("enhance").unwrap();
            std::fs::write(dir.join("in.png"), b"x").unwrap();
            *created_clone.lock().unwrap() = Some(dir.path().to_path_buf());
            panic!("boom");
        }));

        assert!(result.is_err());
        let path = created.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
        assert!(tracker.tracked().is_empty());
    }

    #[test]
    fn test_drain_removes_everything() {
        let tracker = TempResourceTracker::new(None).unwrap();
        let root = tracker.root().unwrap();
        let artifact = tracker.artifact("a", "png").unwrap();
        std::fs::write(artifact.path(), b"x").unwrap();
        let dir = tracker.scoped_dir("work").unwrap();

        tracker.drain();
        assert!(!root.exists());
        assert!(!artifact.exists());
        assert!(!dir.path().exists());
        assert!(tracker.artifact("late", "png").is_err());

        // guards dropping after the drain must not panic
        drop(dir);
        drop(artifact);
        tracker.drain();
    }

    #[test]
    fn test_dropping_last_handle_drains() {
        let parent = tempfile::tempdir().unwrap();
        let tracker = TempResourceTracker::new(Some(parent.path())).unwrap();
        let root = tracker.root().unwrap();
        assert!(root.starts_with(parent.path()));
        let artifact = tracker.artifact("keep", "png").unwrap();

        drop(tracker);
        assert!(!root.exists());
        drop(artifact);
    }
}
