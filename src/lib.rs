//! Ralph: autonomous work-loop orchestrator for AI coding agents.
//!
//! Ralph drains a queue of *beads* (structured work items tracked by an
//! external issue tracker), executing each in an isolated git worktree
//! via an agent subprocess, then folding successful work back into a
//! mainline branch. See [`runner::Runner`] for the scheduling entry point.

pub mod agent;
pub mod batcher;
pub mod bead;
pub mod cli;
pub mod config;
pub mod merge;
pub mod observer;
pub mod outcome;
pub mod prompt;
pub mod runner;
pub mod status;
pub mod trace;
pub mod tracker;
pub mod worktree;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RalphError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tracker error: {0}")]
    Tracker(String),

    #[error("worktree error: {0}")]
    Worktree(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("runner error: {0}")]
    Runner(String),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

pub type Result<T> = std::result::Result<T, RalphError>;
