//! Agent subprocess execution (spec §4.3).
//!
//! Launches the configured agent command against a scoped working
//! directory with a rendered prompt, streams its stdout, parses tool
//! events out of it, and honors both a per-invocation timeout and
//! cancellation.

pub mod toolevent;

pub use toolevent::{parse_line, ToolEvent, ToolKind};
pub use tokio_util::sync::CancellationToken;

use crate::config::AgentCommand;
use crate::{RalphError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

/// Result of a single agent invocation (spec §3 `AgentResult`).
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// -1 reserved for timeout.
    pub exit_code: i32,
    pub duration: Duration,
    pub stdout: String,
    /// Last few KB of stderr, for diagnostics.
    pub stderr_snippet: String,
    /// Opaque correlation id the agent subprocess may emit (chat/session id).
    pub chat_id: Option<String>,
    pub timed_out: bool,
    pub error_message: Option<String>,
}

impl AgentResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Where to send an agent's streamed stdout.
pub enum StdoutSink<'a> {
    Discard,
    Capture,
    Tee(&'a dyn Fn(&ToolEvent)),
}

/// Options controlling a single `AgentRunner::run` invocation.
pub struct AgentOptions<'a> {
    pub timeout: Duration,
    pub stdout_sink: StdoutSink<'a>,
    pub cancellation: Option<CancellationToken>,
}

impl<'a> Default for AgentOptions<'a> {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            stdout_sink: StdoutSink::Capture,
            cancellation: None,
        }
    }
}

/// Launches a single agent invocation against a scoped working
/// directory.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, workdir: &Path, prompt: &str, options: AgentOptions<'_>) -> Result<AgentResult>;
}

/// Production `AgentRunner` spawning the configured subprocess with a
/// piped stdin/stdout (not a PTY — stdout is parsed as line-delimited
/// JSON, which a terminal emulation layer brings no benefit to).
pub struct ProcessAgentRunner {
    command: AgentCommand,
}

impl ProcessAgentRunner {
    pub fn new(command: AgentCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AgentRunner for ProcessAgentRunner {
    async fn run(
        &self,
        workdir: &Path,
        prompt: &str,
        options: AgentOptions<'_>,
    ) -> Result<AgentResult> {
        let start = Instant::now();

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .current_dir(workdir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RalphError::Agent(format!("failed to spawn agent: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.write_all(b"\n").await;
            let _ = stdin.shutdown().await;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RalphError::Agent("agent stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RalphError::Agent("agent stderr not piped".to_string()))?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut captured_stdout = String::new();
        let mut stderr_tail = String::new();
        let mut chat_id = None;

        let run_fut = async {
            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if let Some(event) = toolevent::parse_line(&line) {
                                    if let StdoutSink::Tee(sink) = &options.stdout_sink {
                                        sink(&event);
                                    }
                                }
                                if chat_id.is_none() {
                                    chat_id = extract_chat_id(&line);
                                }
                                if matches!(options.stdout_sink, StdoutSink::Capture | StdoutSink::Tee(_)) {
                                    captured_stdout.push_str(&line);
                                    captured_stdout.push('\n');
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                return Err(RalphError::Agent(format!("stdout read error: {e}")));
                            }
                        }
                    }
                    line = stderr_lines.next_line() => {
                        if let Ok(Some(line)) = line {
                            stderr_tail.push_str(&line);
                            stderr_tail.push('\n');
                            if stderr_tail.len() > 8 * 1024 {
                                let cut = stderr_tail.len() - 8 * 1024;
                                stderr_tail.drain(..cut);
                            }
                        }
                    }
                }
            }
            Ok(())
        };

        let cancel_fut = async {
            if let Some(token) = &options.cancellation {
                token.cancelled().await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let outcome = tokio::select! {
            res = tokio::time::timeout(options.timeout, run_fut) => res,
            _ = cancel_fut => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(AgentResult {
                    exit_code: -1,
                    duration: start.elapsed(),
                    stdout: captured_stdout,
                    stderr_snippet: stderr_tail,
                    chat_id,
                    timed_out: false,
                    error_message: Some("cancelled".to_string()),
                });
            }
        };

        match outcome {
            Err(_elapsed) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(AgentResult {
                    exit_code: -1,
                    duration: start.elapsed(),
                    stdout: captured_stdout,
                    stderr_snippet: stderr_tail,
                    chat_id,
                    timed_out: true,
                    error_message: Some("agent invocation timed out".to_string()),
                })
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| RalphError::Agent(format!("failed to wait on agent: {e}")))?;
                Ok(AgentResult {
                    exit_code: status.code().unwrap_or(-1),
                    duration: start.elapsed(),
                    stdout: captured_stdout,
                    stderr_snippet: stderr_tail,
                    chat_id,
                    timed_out: false,
                    error_message: None,
                })
            }
        }
    }
}

fn extract_chat_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value
        .get("session_id")
        .or_else(|| value.get("chat_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
