//! Run status manifest.
//!
//! Written for the operator (`--status`) and for post-mortem reading. The
//! pipeline never consults it to decide what to do next; the resume unit is
//! the only checkpoint.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::files;
use crate::pipeline::Stage;

const RUN_MANIFEST_FILENAME: &str = "run-manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Reverted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Reverted => write!(f, "reverted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub stage: Stage,
    pub status: RunStatus,
    pub current_action: Option<String>,
    pub progress_percent: u8,
    pub started_at_utc: String,
    pub finished_at_utc: Option<String>,
    pub error: Option<String>,
}

impl RunManifest {
    pub fn begin(stage: Stage) -> Result<Self> {
        Ok(Self {
            stage,
            status: RunStatus::Running,
            current_action: None,
            progress_percent: 0,
            started_at_utc: now_utc_compact()?,
            finished_at_utc: None,
            error: None,
        })
    }

    pub fn finish(&mut self, status: RunStatus, error: Option<String>) -> Result<()> {
        self.status = status;
        self.current_action = None;
        if status == RunStatus::Success {
            self.progress_percent = 100;
        }
        self.finished_at_utc = Some(now_utc_compact()?);
        self.error = error;
        Ok(())
    }
}

pub fn manifest_path(state_dir: &Path) -> PathBuf {
    state_dir.join(RUN_MANIFEST_FILENAME)
}

pub fn write_manifest(state_dir: &Path, manifest: &RunManifest) -> Result<()> {
    let path = manifest_path(state_dir);
    files::write_json_atomic(&path, manifest)
        .with_context(|| format!("writing run manifest '{}'", path.display()))
}

/// Load the manifest of the last run. `None` when nothing has run yet.
pub fn load_manifest(state_dir: &Path) -> Result<Option<RunManifest>> {
    let path = manifest_path(state_dir);
    if !path.is_file() {
        return Ok(None);
    }
    let bytes =
        fs::read(&path).with_context(|| format!("reading run manifest '{}'", path.display()))?;
    let parsed = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing run manifest '{}'", path.display()))?;
    Ok(Some(parsed))
}

/// Share of `total` covered by `done`, in whole percent.
pub fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}

pub fn now_utc_compact() -> Result<String> {
    let now = OffsetDateTime::now_utc();
    Ok(format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    ))
}
