use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::files;

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub iterations: u64,
    #[serde(default)]
    pub errors: u64,
}

/// Job run counters shared by the scheduler tasks. Counts restored from a
/// previous `status.json` are carried forward.
#[derive(Clone)]
pub struct StatusFile {
    path: PathBuf,
    base_iterations: u64,
    base_errors: u64,
    iterations: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
}

impl StatusFile {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let previous = Self::read(&path);
        StatusFile {
            base_iterations: previous.as_ref().map_or(0, |s| s.iterations),
            base_errors: previous.as_ref().map_or(0, |s| s.errors),
            path,
            iterations: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn read(path: &Path) -> Option<Status> {
        files::read_json(path)
    }

    /// Count one finished job run.
    pub fn record(&self, success: bool) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn current(&self, now: DateTime<Utc>) -> Status {
        Status {
            status: "running".to_string(),
            last_update: now,
            iterations: self.base_iterations + self.iterations.load(Ordering::Relaxed),
            errors: self.base_errors + self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn write(&self, now: DateTime<Utc>) -> Result<Status> {
        let status = self.current(now);
        files::write_json_atomic(&self.path, &status)?;
        Ok(status)
    }
}
