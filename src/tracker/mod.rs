//! Narrow façade over the external issue tracker (`bd`).
//!
//! Mirrors the shellout idiom the teacher uses for `br`/`pq`
//! (`src/integration/beads.rs`, `src/integration/porque.rs`): spawn the
//! binary, parse its `--json` stdout, tolerate a missing binary as
//! "nothing available" rather than a hard error at construction time.

use crate::bead::{Bead, BeadDetail};
use crate::{RalphError, Result};
use std::process::Command;
use std::sync::Mutex;

/// Operations the orchestration core needs from the tracker.
///
/// Implementations must be thread-safe: workers call `ShowBead`
/// concurrently while only one `ReadyBeads` call is in flight at a time
/// (serialized by the picker-level mutex, spec §5).
pub trait TrackerClient: Send + Sync {
    /// List ready beads, optionally scoped to children of `parent`.
    /// Ordered by (priority asc, created_at asc).
    fn ready_beads(&self, parent: Option<&str>) -> Result<Vec<Bead>>;

    /// Fetch the full record for one bead.
    fn show_bead(&self, id: &str) -> Result<BeadDetail>;

    /// Create a bead (used only for merge-conflict question beads).
    fn create_bead(&self, req: &CreateBeadRequest) -> Result<String>;

    /// Add a blocking dependency `from -> to`.
    fn add_dependency(&self, from_id: &str, to_id: &str) -> Result<()>;

    /// Push/pull tracker state. Advisory: failures are warnings, never
    /// propagated as errors.
    fn sync(&self);
}

/// Parameters for `CreateBead`.
#[derive(Debug, Clone)]
pub struct CreateBeadRequest {
    pub title: String,
    pub description: String,
    pub issue_type: String,
    pub labels: Vec<String>,
    pub parent: Option<String>,
}

/// Production `TrackerClient` shelling out to the configured tracker
/// binary (default `bd`).
pub struct CliTrackerClient {
    command: String,
    repo_path: std::path::PathBuf,
    /// Serializes `ready` calls so concurrent workers don't race the
    /// tracker CLI's own state (spec §5, "Locking discipline").
    ready_lock: Mutex<()>,
}

impl CliTrackerClient {
    pub fn new(command: impl Into<String>, repo_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            command: command.into(),
            repo_path: repo_path.into(),
            ready_lock: Mutex::new(()),
        }
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.command)
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| RalphError::Tracker(format!("failed to spawn `{}`: {e}", self.command)))
    }

    fn run_json(&self, args: &[&str]) -> Result<serde_json::Value> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(RalphError::Tracker(format!(
                "`{} {}` exited with {}: {}",
                self.command,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| RalphError::Tracker(format!("malformed tracker output: {e}")))
    }
}

impl TrackerClient for CliTrackerClient {
    fn ready_beads(&self, parent: Option<&str>) -> Result<Vec<Bead>> {
        let _guard = self.ready_lock.lock().unwrap();
        let mut args = vec!["ready", "--json"];
        if let Some(parent) = parent {
            args.push("--parent");
            args.push(parent);
        }
        let value = self.run_json(&args)?;
        // Tolerate a `null` array as empty (spec §4.1 "Parsing").
        if value.is_null() {
            return Ok(Vec::new());
        }
        let mut beads: Vec<Bead> = serde_json::from_value(value)
            .map_err(|e| RalphError::Tracker(format!("malformed ready-list entry: {e}")))?;
        beads.sort_by(|a, b| a.ready_order_key().cmp(&b.ready_order_key()));
        Ok(beads)
    }

    fn show_bead(&self, id: &str) -> Result<BeadDetail> {
        let value = self.run_json(&["show", id, "--json"])?;
        let mut records: Vec<BeadDetail> = serde_json::from_value(value)
            .map_err(|e| RalphError::Tracker(format!("malformed show response: {e}")))?;
        records
            .pop()
            .ok_or_else(|| RalphError::Tracker(format!("bead {id} not found")))
    }

    fn create_bead(&self, req: &CreateBeadRequest) -> Result<String> {
        let mut args: Vec<String> = vec![
            "create".into(),
            "--title".into(),
            req.title.clone(),
            "--description".into(),
            req.description.clone(),
            "--type".into(),
            req.issue_type.clone(),
        ];
        for label in &req.labels {
            args.push("--label".into());
            args.push(label.clone());
        }
        if let Some(parent) = &req.parent {
            args.push("--parent".into());
            args.push(parent.clone());
        }
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args_ref)?;
        if !output.status.success() {
            return Err(RalphError::Tracker(format!(
                "tracker `create` failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn add_dependency(&self, from_id: &str, to_id: &str) -> Result<()> {
        let output = self.run(&["dep", "add", from_id, to_id])?;
        if !output.status.success() {
            return Err(RalphError::Tracker(format!(
                "tracker `dep add` failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    fn sync(&self) {
        match self.run(&["sync"]) {
            Ok(output) if !output.status.success() => {
                tracing::warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "tracker sync reported failure (advisory, ignored)"
                );
            }
            Err(e) => tracing::warn!(error = %e, "tracker sync failed to spawn (advisory, ignored)"),
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_beads_sorts_by_priority_then_created_at() {
        let json = serde_json::json!([
            {"id": "b-2", "title": "second", "status": "open", "priority": 2, "labels": [], "created_at": "2026-01-01T00:00:00Z"},
            {"id": "b-1", "title": "first", "status": "open", "priority": 1, "labels": [], "created_at": "2026-01-02T00:00:00Z"},
        ]);
        let mut beads: Vec<Bead> = serde_json::from_value(json).unwrap();
        beads.sort_by(|a, b| a.ready_order_key().cmp(&b.ready_order_key()));
        assert_eq!(beads[0].id, "b-1");
        assert_eq!(beads[1].id, "b-2");
    }

    #[test]
    fn null_ready_array_is_empty() {
        let value = serde_json::Value::Null;
        assert!(value.is_null());
    }
}
