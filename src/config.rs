//! Ralph configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Command used to invoke the configured agent subprocess.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AgentCommand {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![],
        }
    }
}

/// Runtime config for a single `Runner::run` invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Repository root Ralph operates against.
    pub repo_path: PathBuf,
    /// Mainline branch work is merged into.
    pub mainline: String,
    /// Tracker binary name (default `bd`).
    pub tracker_command: String,
    /// Agent subprocess command.
    pub agent_command: AgentCommand,
    /// Bounded worker parallelism. `1` is a legal degenerate case.
    pub parallelism: usize,
    /// Per-agent-invocation deadline.
    pub agent_timeout: Duration,
    /// Per-merge-conflict-resolution-agent deadline.
    pub merge_agent_timeout: Duration,
    /// Wall-clock deadline for the whole run. `None` means unbounded.
    pub wall_clock_timeout: Option<Duration>,
    /// Stop after this many consecutive failure/timeout outcomes.
    pub consecutive_failure_limit: u32,
    /// Stop after this many iterations. `None` means unbounded.
    pub max_iterations: Option<u32>,
    /// Prefix for the status file, e.g. `.ralph` -> `.ralph-status.json`.
    pub status_file_prefix: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            mainline: "main".to_string(),
            tracker_command: "bd".to_string(),
            agent_command: AgentCommand::default(),
            parallelism: 1,
            agent_timeout: Duration::from_secs(30 * 60),
            merge_agent_timeout: Duration::from_secs(10 * 60),
            wall_clock_timeout: None,
            consecutive_failure_limit: 3,
            max_iterations: None,
            status_file_prefix: ".ralph".to_string(),
        }
    }
}

impl RunConfig {
    /// Validate config invariants the rest of the system assumes hold.
    ///
    /// # Errors
    /// Returns `RalphError::Config` if the repo path doesn't exist or
    /// `parallelism` is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if self.parallelism == 0 {
            return Err(crate::RalphError::Config(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if !self.repo_path.exists() {
            return Err(crate::RalphError::Config(format!(
                "repo path does not exist: {}",
                self.repo_path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parallelism_is_valid() {
        let mut cfg = RunConfig::default();
        cfg.repo_path = std::env::current_dir().unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = RunConfig::default();
        cfg.repo_path = std::env::current_dir().unwrap();
        cfg.parallelism = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_repo_rejected() {
        let mut cfg = RunConfig::default();
        cfg.repo_path = PathBuf::from("/no/such/path/ralph-test");
        assert!(cfg.validate().is_err());
    }
}
