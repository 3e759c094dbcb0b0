// Per-call scratch directories for extracted frames.
//
// Each video moderation call owns exactly one ScratchSession. The directory
// name is randomized by tempfile, so concurrent calls never share a frame
// namespace. Removal happens on close() or on drop, which covers early
// returns, errors, and cancelled futures alike. Removal failures are logged
// and never override the moderation outcome. Creation and close() run on
// blocking threads; the Drop fallback removes synchronously.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{ModerationError, Result};

const SESSION_PREFIX: &str = "vigil-frames-";

/// An exclusively-owned scratch directory, deleted with all its contents
/// when the session ends.
#[derive(Debug)]
pub struct ScratchSession {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchSession {
    /// Create a fresh, uniquely named directory under `root`.
    ///
    /// The filesystem work runs on a blocking thread.
    pub async fn create(root: &Path) -> Result<Self> {
        let owned = root.to_path_buf();
        tokio::task::spawn_blocking(move || Self::create_blocking(&owned))
            .await
            .map_err(|e| ModerationError::ScratchUnavailable {
                root: root.to_path_buf(),
                source: std::io::Error::other(e),
            })?
    }

    fn create_blocking(root: &Path) -> Result<Self> {
        let unavailable = |source: std::io::Error| ModerationError::ScratchUnavailable {
            root: root.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(root).map_err(unavailable)?;
        let dir = tempfile::Builder::new()
            .prefix(SESSION_PREFIX)
            .tempdir_in(root)
            .map_err(unavailable)?;
        let path = dir.path().to_path_buf();

        debug!(path = %path.display(), "Created scratch session");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory on a blocking thread and wait for it.
    ///
    /// If this future is dropped early the removal still completes.
    pub async fn close(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(result) => log_removal(&path, result),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Scratch removal task failed"
            ),
        }
    }

    fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            log_removal(&self.path, dir.close());
        }
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed scratch session"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove scratch session"
        ),
    }
}

impl Drop for ScratchSession {
    fn drop(&mut self) {
        self.release();
    }
}
