//! File-backed snapshot persistence with atomic writes.
//!
//! Uses temp file + rename so a crash mid-write never leaves a truncated
//! snapshot behind.

use crate::store::format::Snapshot;
use crate::LicensegateError;
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot file location.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Snapshot file at `path`. Parent directories are created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a snapshot atomically.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), LicensegateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LicensegateError::SnapshotIO(format!("Failed to create dir: {}", e))
                })?;
            }
        }

        let json = snapshot.to_json()?;

        // Write to temp file
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)
            .map_err(|e| LicensegateError::SnapshotIO(format!("Failed to write temp file: {}", e)))?;

        // Atomic rename
        fs::rename(&temp_path, &self.path)
            .map_err(|e| LicensegateError::SnapshotIO(format!("Failed to rename snapshot: {}", e)))?;

        Ok(())
    }

    /// Load the snapshot, if the file exists.
    pub fn load(&self) -> Result<Option<Snapshot>, LicensegateError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)
            .map_err(|e| LicensegateError::SnapshotIO(format!("Failed to read snapshot: {}", e)))?;

        Snapshot::from_json(&json).map(Some)
    }
}
