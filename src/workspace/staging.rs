use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{AppError, Result};

/// Host-side scratch directory for one run: the bootstrap script, the
/// auxiliary tool config and a synthesised Dockerfile live here until
/// teardown.
#[derive(Debug)]
pub struct StagingArea {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagingArea {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("spindle-run-")
            .tempdir()
            .map_err(|e| AppError::Workspace(format!("Failed to create staging dir: {e}")))?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `content` to `name` inside the staging dir.
    pub fn write_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        if name.contains('/') || name.contains("..") {
            return Err(AppError::Workspace(format!(
                "Invalid staging file name: {name}"
            )));
        }
        let target = self.path.join(name);
        std::fs::write(&target, content)
            .map_err(|e| AppError::Workspace(format!("Failed to write {name}: {e}")))?;
        Ok(target)
    }

    pub fn is_closed(&self) -> bool {
        self.dir.is_none()
    }

    /// Delete the directory. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        match self.dir.take() {
            Some(dir) => dir
                .close()
                .map_err(|e| AppError::Workspace(format!("Failed to remove staging dir: {e}"))),
            None => Ok(()),
        }
    }
}
