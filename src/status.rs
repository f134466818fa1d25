//! Atomic status-file writer (spec §6).
//!
//! Written for external pollers, not for invariant enforcement: a
//! failure to write is logged and never aborts the run.

use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Tallies {
    pub completed: u32,
    pub questions: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    pub iteration: u32,
    pub max_iterations: Option<u32>,
    pub current_bead: Option<String>,
    pub elapsed_ns: u128,
    pub tallies: Tallies,
    pub stop_reason: Option<String>,
}

/// Writes `StatusSnapshot`s to `<prefix>-status.json` at the repo
/// root, atomically (write-to-temp + rename).
pub struct StatusFile {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl StatusFile {
    /// `prefix` is used verbatim (the caller supplies any leading dot,
    /// e.g. `.ralph` -> `.ralph-status.json`, matching `RunConfig`'s
    /// `status_file_prefix` default).
    pub fn new(repo_path: impl AsRef<Path>, prefix: &str) -> Self {
        let path = repo_path.as_ref().join(format!("{prefix}-status.json"));
        let tmp_path = repo_path.as_ref().join(format!("{prefix}-status.json.tmp"));
        Self { path, tmp_path }
    }

    /// Best-effort write: failures are logged, never propagated.
    pub fn write(&self, snapshot: &StatusSnapshot) {
        if let Err(e) = self.write_inner(snapshot) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to write status file");
        }
    }

    fn write_inner(&self, snapshot: &StatusSnapshot) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&self.tmp_path, json)?;
        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}
