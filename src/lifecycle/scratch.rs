//! Per-run scratch directory handed to the backend as `TMPDIR`.

use std::io;
use std::path::Path;

use tempfile::TempDir;

/// Removed on [`ScratchSpace::cleanup`], or on drop if cleanup never runs.
#[derive(Debug, Default)]
pub struct ScratchSpace {
    dir: Option<TempDir>,
}

impl ScratchSpace {
    pub fn create(enabled: bool) -> io::Result<Self> {
        if !enabled {
            return Ok(Self::default());
        }
        let dir = tempfile::Builder::new().prefix("stdio-bridge-").tempdir()?;
        tracing::debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    pub fn cleanup(mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed scratch directory"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch directory"),
            }
        }
    }
}
