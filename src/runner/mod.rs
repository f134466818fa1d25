//! Core scheduler (spec §4.8): pulls batches, dispatches beads to a
//! bounded worker pool, applies safety guards, and aggregates results.

use crate::agent::{AgentOptions, AgentResult, AgentRunner, StdoutSink, ToolEvent};
use crate::batcher::Batcher;
use crate::bead::{Bead, BeadDetail};
use crate::config::RunConfig;
use crate::merge::{MergeCoordinator, MergeOutcome};
use crate::observer::{Event, ProgressObserver};
use crate::outcome::{Outcome, OutcomeAssessor};
use crate::prompt::PromptBuilder;
use crate::status::{StatusFile, StatusSnapshot, Tallies};
use crate::tracker::TrackerClient;
use crate::worktree::WorktreeManager;
use crate::{RalphError, Result};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Why a run stopped (spec §3, §6). Each variant maps to a distinct
/// process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Normal,
    MaxIterations,
    ConsecutiveFailures,
    WallClockTimeout,
    ContextCancelled,
    AllBeadsSkipped,
}

impl StopReason {
    pub fn exit_code(self) -> i32 {
        match self {
            StopReason::Normal => 0,
            StopReason::MaxIterations => 2,
            StopReason::ConsecutiveFailures => 3,
            StopReason::WallClockTimeout => 4,
            StopReason::ContextCancelled => 5,
            StopReason::AllBeadsSkipped => 6,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            StopReason::Normal => "normal",
            StopReason::MaxIterations => "max-iterations",
            StopReason::ConsecutiveFailures => "consecutive-failures",
            StopReason::WallClockTimeout => "wall-clock-timeout",
            StopReason::ContextCancelled => "context-cancelled",
            StopReason::AllBeadsSkipped => "all-beads-skipped",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for StopReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Bead snapshot + Outcome + AgentResult + worktree/branch (spec §3).
#[derive(Debug, Clone)]
pub struct BeadResult {
    pub bead: Bead,
    pub outcome: Outcome,
    pub agent_result: AgentResult,
    pub summary: String,
    pub worktree_path: Option<PathBuf>,
    pub branch: Option<String>,
}

/// Final counts and terminal reason for a completed run (spec §3).
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub succeeded: u32,
    pub questions: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub skipped: u32,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub stop_reason: StopReason,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

#[derive(Default)]
struct RunState {
    iterations: u32,
    succeeded: u32,
    questions: u32,
    failed: u32,
    timed_out: u32,
    skipped: u32,
}

/// The core scheduler. Cheap to clone: every field is an `Arc` (or
/// plain config data), so cloning hands a worker task its own handle
/// without copying state.
#[derive(Clone)]
pub struct Runner {
    tracker: Arc<dyn TrackerClient>,
    worktrees: Arc<WorktreeManager>,
    agent: Arc<dyn AgentRunner>,
    prompts: Arc<PromptBuilder>,
    observer: Arc<dyn ProgressObserver>,
    status_file: Arc<StatusFile>,
    config: RunConfig,
}

impl Runner {
    pub fn new(
        config: RunConfig,
        tracker: Arc<dyn TrackerClient>,
        worktrees: Arc<WorktreeManager>,
        agent: Arc<dyn AgentRunner>,
        prompts: Arc<PromptBuilder>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        let status_file = Arc::new(StatusFile::new(&config.repo_path, &config.status_file_prefix));
        Self {
            tracker,
            worktrees,
            agent,
            prompts,
            observer,
            status_file,
            config,
        }
    }

    /// Drive `batcher` to completion, honoring every configured guard.
    pub async fn run(&self, batcher: &mut dyn Batcher, cancellation: CancellationToken) -> Result<RunSummary> {
        let run_start = Instant::now();
        self.observer.notify(&Event::LoopStart { root_bead: None });

        let state = Mutex::new(RunState::default());
        let consecutive_failures = AtomicU32::new(0);
        let mut retry_guard: Option<(String, u8)> = None;
        let stop_reason;

        // Set the instant any guard trips, so a batch already fanned out
        // to the worker pool (every bead in a `Wave` batch, or any batch
        // under `parallelism > 1`) stops picking up new beads instead of
        // running the whole batch to completion before the next guard
        // check at the top of `'outer` (spec §4.8 step 6: "no new bead is
        // picked up").
        let should_stop = Arc::new(AtomicBool::new(false));

        // A second token, derived from the caller's `cancellation` plus
        // the wall-clock deadline, that actually reaches in-flight agent
        // subprocesses (spec §5: "a cancelled parent context propagates
        // to every in-flight agent subprocess ... the subprocess is
        // terminated"). The guard checks above stay keyed off the
        // caller's own token and `run_start.elapsed()` so StopReason
        // selection is unaffected by this derived token's existence.
        let kill_switch = CancellationToken::new();
        {
            let kill_switch = kill_switch.clone();
            let cancellation = cancellation.clone();
            let wall_clock = self.config.wall_clock_timeout;
            let should_stop = should_stop.clone();
            tokio::spawn(async move {
                match wall_clock {
                    Some(deadline) => {
                        tokio::select! {
                            _ = cancellation.cancelled() => {}
                            _ = tokio::time::sleep(deadline) => {}
                        }
                    }
                    None => cancellation.cancelled().await,
                }
                should_stop.store(true, Ordering::SeqCst);
                kill_switch.cancel();
            });
        }

        'outer: loop {
            if cancellation.is_cancelled() {
                stop_reason = StopReason::ContextCancelled;
                break;
            }
            if let Some(wall_clock) = self.config.wall_clock_timeout {
                if run_start.elapsed() >= wall_clock {
                    stop_reason = StopReason::WallClockTimeout;
                    break;
                }
            }
            if let Some(max) = self.config.max_iterations {
                if state.lock().unwrap().iterations >= max {
                    stop_reason = StopReason::MaxIterations;
                    break;
                }
            }
            if consecutive_failures.load(Ordering::SeqCst) >= self.config.consecutive_failure_limit {
                stop_reason = StopReason::ConsecutiveFailures;
                break;
            }

            self.tracker.sync();

            let batch = match batcher.next_batch(self.tracker.as_ref()) {
                Ok(Some(batch)) if batch.is_empty() => {
                    // Batcher's "skip, try again" signal (spec §4.7) —
                    // distinct from end-of-stream. Yield so this doesn't
                    // spin the executor while a batcher is between
                    // eligible candidates.
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    stop_reason = StopReason::Normal;
                    break;
                }
                Err(e) => return Err(e),
            };

            let mut to_run = Vec::with_capacity(batch.len());
            for bead in batch {
                let skip = match &mut retry_guard {
                    Some((id, count)) if *id == bead.id => {
                        *count += 1;
                        if *count >= 2 {
                            stop_reason = StopReason::AllBeadsSkipped;
                            break 'outer;
                        }
                        true
                    }
                    _ => false,
                };
                if skip {
                    let mut s = state.lock().unwrap();
                    s.iterations += 1;
                    s.skipped += 1;
                    self.write_status(&s, run_start.elapsed(), None, None);
                } else {
                    to_run.push(bead);
                }
            }
            if to_run.is_empty() {
                continue;
            }

            let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
            let mut join_set: JoinSet<Option<BeadResult>> = JoinSet::new();
            for bead in to_run {
                let semaphore = semaphore.clone();
                let runner = self.clone();
                let kill_switch = kill_switch.clone();
                let should_stop = should_stop.clone();
                join_set.spawn(async move {
                    // Checked both before queueing for a permit and again
                    // after acquiring one: a guard may trip while this
                    // bead was waiting its turn under `parallelism`.
                    if should_stop.load(Ordering::SeqCst) {
                        return None;
                    }
                    let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                    if should_stop.load(Ordering::SeqCst) {
                        return None;
                    }
                    Some(runner.run_one(bead, kill_switch).await)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let Some(result) = joined.map_err(|e| RalphError::Runner(format!("worker task panicked: {e}")))? else {
                    // Guard tripped before this bead was dispatched; it
                    // never ran and must not be counted as an iteration.
                    continue;
                };

                retry_guard = if result.outcome == Outcome::Success {
                    None
                } else {
                    Some((result.bead.id.clone(), 0))
                };

                match result.outcome {
                    Outcome::Failure | Outcome::Timeout => {
                        let failures = consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if failures >= self.config.consecutive_failure_limit {
                            should_stop.store(true, Ordering::SeqCst);
                        }
                    }
                    Outcome::Success | Outcome::Question => {
                        consecutive_failures.store(0, Ordering::SeqCst);
                    }
                }

                {
                    let mut s = state.lock().unwrap();
                    s.iterations += 1;
                    match result.outcome {
                        Outcome::Success => s.succeeded += 1,
                        Outcome::Question => s.questions += 1,
                        Outcome::Failure => s.failed += 1,
                        Outcome::Timeout => s.timed_out += 1,
                    }
                    if let Some(max) = self.config.max_iterations {
                        if s.iterations >= max {
                            should_stop.store(true, Ordering::SeqCst);
                        }
                    }
                    self.write_status(&s, run_start.elapsed(), Some(&result.bead.id), None);
                }

                self.observer.notify(&Event::BeadComplete { result });
            }
        }

        let summary = {
            let s = state.lock().unwrap();
            RunSummary {
                iterations: s.iterations,
                succeeded: s.succeeded,
                questions: s.questions,
                failed: s.failed,
                timed_out: s.timed_out,
                skipped: s.skipped,
                duration: run_start.elapsed(),
                stop_reason,
            }
        };

        self.write_status_final(&summary);
        self.observer.notify(&Event::LoopEnd { summary: summary.clone() });
        Ok(summary)
    }

    fn write_status(&self, state: &RunState, elapsed: Duration, current_bead: Option<&str>, stop_reason: Option<StopReason>) {
        self.status_file.write(&StatusSnapshot {
            state: if stop_reason.is_some() { "stopped".to_string() } else { "running".to_string() },
            iteration: state.iterations,
            max_iterations: self.config.max_iterations,
            current_bead: current_bead.map(str::to_string),
            elapsed_ns: elapsed.as_nanos(),
            tallies: Tallies {
                completed: state.succeeded,
                questions: state.questions,
                failed: state.failed,
                timed_out: state.timed_out,
                skipped: state.skipped,
            },
            stop_reason: stop_reason.map(|r| r.to_string()),
        });
    }

    fn write_status_final(&self, summary: &RunSummary) {
        self.status_file.write(&StatusSnapshot {
            state: "stopped".to_string(),
            iteration: summary.iterations,
            max_iterations: self.config.max_iterations,
            current_bead: None,
            elapsed_ns: summary.duration.as_nanos(),
            tallies: Tallies {
                completed: summary.succeeded,
                questions: summary.questions,
                failed: summary.failed,
                timed_out: summary.timed_out,
                skipped: summary.skipped,
            },
            stop_reason: Some(summary.stop_reason.to_string()),
        });
    }

    fn render_prompt(&self, detail: &BeadDetail) -> Result<String> {
        if detail.issue_type.as_deref() == Some("epic") {
            self.prompts.epic_prompt(detail)
        } else {
            self.prompts.task_prompt(detail)
        }
    }

    fn early_failure(&self, bead: Bead, message: String) -> BeadResult {
        tracing::warn!(bead_id = %bead.id, error = %message, "bead failed before agent invocation");
        BeadResult {
            bead,
            outcome: Outcome::Failure,
            agent_result: AgentResult {
                exit_code: -1,
                duration: Duration::ZERO,
                stdout: String::new(),
                stderr_snippet: String::new(),
                chat_id: None,
                timed_out: false,
                error_message: Some(message.clone()),
            },
            summary: message,
            worktree_path: None,
            branch: None,
        }
    }

    async fn run_one(self, bead: Bead, cancellation: CancellationToken) -> BeadResult {
        self.observer.notify(&Event::BeadStart { bead: bead.clone() });

        let worktree_info = match self.worktrees.create_worktree(&bead.id) {
            Ok(info) => info,
            Err(e) => return self.early_failure(bead, format!("failed to create worktree: {e}")),
        };

        let detail = match self.tracker.show_bead(&bead.id) {
            Ok(d) => d,
            Err(e) => {
                let _ = self.worktrees.remove_worktree(&worktree_info);
                return self.early_failure(bead, format!("failed to fetch bead detail: {e}"));
            }
        };

        let prompt = match self.render_prompt(&detail) {
            Ok(p) => p,
            Err(e) => {
                let _ = self.worktrees.remove_worktree(&worktree_info);
                return self.early_failure(bead, format!("failed to render prompt: {e}"));
            }
        };

        let observer = self.observer.clone();
        let bead_id_for_tee = bead.id.clone();
        let tee = move |event: &ToolEvent| {
            let notification = if event.is_start {
                Event::ToolStart {
                    bead_id: bead_id_for_tee.clone(),
                    event: event.clone(),
                }
            } else {
                Event::ToolEnd {
                    bead_id: bead_id_for_tee.clone(),
                    event: event.clone(),
                }
            };
            observer.notify(&notification);
        };

        let agent_result = match self
            .agent
            .run(
                &worktree_info.path,
                &prompt,
                AgentOptions {
                    timeout: self.config.agent_timeout,
                    stdout_sink: StdoutSink::Tee(&tee),
                    cancellation: Some(cancellation.clone()),
                },
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let _ = self.worktrees.remove_worktree(&worktree_info);
                return self.early_failure(bead, format!("agent invocation failed: {e}"));
            }
        };

        let assessor = OutcomeAssessor::new(self.tracker.as_ref());
        let (mut outcome, mut summary) = assessor.assess(&bead.id, &agent_result);

        let mut keep_worktree = false;
        if outcome == Outcome::Success {
            match self.worktrees.mainline_repo() {
                Ok(mainline_repo) => {
                    let coordinator = MergeCoordinator::new(
                        mainline_repo,
                        self.prompts.as_ref(),
                        self.tracker.as_ref(),
                        self.agent.as_ref(),
                        self.config.merge_agent_timeout,
                        cancellation.clone(),
                    );
                    match coordinator
                        .merge(&worktree_info.branch, self.worktrees.mainline(), &bead.id)
                        .await
                    {
                        Ok(MergeOutcome::Clean) | Ok(MergeOutcome::ResolvedByAgent) => {}
                        Ok(MergeOutcome::Conflict { question_bead_id }) => {
                            summary = format!("{summary}; merge conflict, filed question bead {question_bead_id}");
                        }
                        Err(e) => {
                            outcome = Outcome::Failure;
                            summary = format!("merge failed: {e}");
                            keep_worktree = true;
                        }
                    }
                }
                Err(e) => {
                    outcome = Outcome::Failure;
                    summary = format!("failed to resolve mainline worktree for merge: {e}");
                    keep_worktree = true;
                }
            }
        }

        if !keep_worktree {
            if let Err(e) = self.worktrees.remove_worktree(&worktree_info) {
                tracing::warn!(bead_id = %bead.id, error = %e, "failed to remove worktree");
            }
        }

        BeadResult {
            bead,
            outcome,
            agent_result,
            summary,
            worktree_path: Some(worktree_info.path),
            branch: Some(worktree_info.branch),
        }
    }
}
