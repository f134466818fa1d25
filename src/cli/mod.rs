//! CLI command definitions.

use crate::config::{AgentCommand, RunConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ralph")]
#[command(about = "Autonomous work-loop orchestrator driving AI coding agents through a bead queue", long_about = None)]
pub struct Cli {
    /// Path to the repository (defaults to current directory)
    #[arg(short, long)]
    pub repo: Option<PathBuf>,

    /// Mainline branch work is merged into.
    #[arg(long, default_value = "main")]
    pub mainline: String,

    /// Tracker binary name.
    #[arg(long, default_value = "bd")]
    pub tracker: String,

    /// Agent subprocess program.
    #[arg(long, default_value = "claude")]
    pub agent: String,

    /// Extra arguments passed to the agent subprocess.
    #[arg(long = "agent-arg")]
    pub agent_args: Vec<String>,

    /// Bounded worker parallelism.
    #[arg(short, long, default_value_t = 1)]
    pub parallelism: usize,

    /// Per-agent-invocation timeout, in seconds.
    #[arg(long, default_value_t = 1800)]
    pub agent_timeout_secs: u64,

    /// Per-merge-conflict-resolution-agent timeout, in seconds.
    #[arg(long, default_value_t = 600)]
    pub merge_agent_timeout_secs: u64,

    /// Wall-clock deadline for the whole run, in seconds. Unbounded if omitted.
    #[arg(long)]
    pub wall_clock_timeout_secs: Option<u64>,

    /// Stop after this many consecutive failure/timeout outcomes.
    #[arg(long, default_value_t = 3)]
    pub consecutive_failure_limit: u32,

    /// Stop after this many iterations. Unbounded if omitted.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Prefix for the status file.
    #[arg(long, default_value = ".ralph")]
    pub status_file_prefix: String,

    /// Run a single named bead instead of pulling from the ready queue.
    #[arg(long)]
    pub bead: Option<String>,

    /// Run a single named epic's ready children sequentially.
    #[arg(long, conflicts_with = "bead")]
    pub epic: Option<String>,

    /// Dispatch every currently ready bead per wave instead of one at a time.
    #[arg(long, conflicts_with_all = ["bead", "epic"])]
    pub wave: bool,
}

impl Cli {
    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            repo_path: self.repo.clone().unwrap_or_else(|| PathBuf::from(".")),
            mainline: self.mainline.clone(),
            tracker_command: self.tracker.clone(),
            agent_command: AgentCommand {
                program: self.agent.clone(),
                args: self.agent_args.clone(),
            },
            parallelism: self.parallelism,
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
            merge_agent_timeout: Duration::from_secs(self.merge_agent_timeout_secs),
            wall_clock_timeout: self.wall_clock_timeout_secs.map(Duration::from_secs),
            consecutive_failure_limit: self.consecutive_failure_limit,
            max_iterations: self.max_iterations,
            status_file_prefix: self.status_file_prefix.clone(),
        }
    }
}
