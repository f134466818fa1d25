//! Merging a worktree branch back into mainline (spec §4.6).
//!
//! Shells out to the `git` binary rather than driving `git2`'s merge
//! machinery directly: hook suppression via `core.hooksPath` and the
//! literal `merge <source> --no-edit` / `commit --no-edit` verbs only
//! make sense against the real CLI, mirroring the shellout idiom
//! `TrackerClient` already uses against `bd`.

use crate::agent::{AgentOptions, AgentRunner, CancellationToken, StdoutSink};
use crate::bead::NEEDS_HUMAN_LABEL;
use crate::prompt::PromptBuilder;
use crate::tracker::{CreateBeadRequest, TrackerClient};
use crate::{RalphError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Index states that mean "unmerged path" in `git status --porcelain`.
const CONFLICT_CODES: &[&str] = &["UU", "AA", "DD", "AU", "UA", "DU", "UD"];

/// Outcome of a single merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merge completed with no conflicts.
    Clean,
    /// Conflicts were resolved by the agent and committed.
    ResolvedByAgent,
    /// Conflicts could not be resolved; a question bead was filed.
    Conflict { question_bead_id: String },
}

pub struct MergeCoordinator<'a> {
    mainline_repo: PathBuf,
    prompts: &'a PromptBuilder,
    tracker: &'a dyn TrackerClient,
    agent: &'a dyn AgentRunner,
    merge_agent_timeout: Duration,
    cancellation: CancellationToken,
}

impl<'a> MergeCoordinator<'a> {
    pub fn new(
        mainline_repo: impl Into<PathBuf>,
        prompts: &'a PromptBuilder,
        tracker: &'a dyn TrackerClient,
        agent: &'a dyn AgentRunner,
        merge_agent_timeout: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            mainline_repo: mainline_repo.into(),
            prompts,
            tracker,
            agent,
            merge_agent_timeout,
            cancellation,
        }
    }

    /// Merge `source_branch` into `target_branch`, resolving conflicts
    /// via the agent if needed, and always restoring the
    /// mainline-owning worktree's original branch.
    pub async fn merge(
        &self,
        source_branch: &str,
        target_branch: &str,
        originating_bead_id: &str,
    ) -> Result<MergeOutcome> {
        let original_branch = current_branch(&self.mainline_repo)?;

        let result = self
            .merge_inner(source_branch, target_branch, originating_bead_id)
            .await;

        if let Err(e) = checkout(&self.mainline_repo, &original_branch) {
            tracing::warn!(
                branch = %original_branch,
                error = %e,
                "failed to restore original branch after merge attempt"
            );
        }

        result
    }

    async fn merge_inner(
        &self,
        source_branch: &str,
        target_branch: &str,
        originating_bead_id: &str,
    ) -> Result<MergeOutcome> {
        checkout(&self.mainline_repo, target_branch)?;

        let hooks_dir = tempfile::tempdir()
            .map_err(|e| RalphError::Merge(format!("failed to create temp hooks dir: {e}")))?;

        let merge_status = Command::new("git")
            .args([
                "-c",
                &format!("core.hooksPath={}", hooks_dir.path().display()),
                "merge",
                source_branch,
                "--no-edit",
            ])
            .current_dir(&self.mainline_repo)
            .output()
            .map_err(|e| RalphError::Merge(format!("failed to spawn git merge: {e}")))?;

        if merge_status.status.success() {
            return Ok(MergeOutcome::Clean);
        }

        let conflicts = conflicting_files(&self.mainline_repo)?;
        if conflicts.is_empty() {
            // Merge failed but not with index conflicts: something else
            // went wrong (e.g. not a fast-forward, dirty tree). Abort
            // and surface as an ordinary merge failure.
            let _ = Command::new("git")
                .args(["merge", "--abort"])
                .current_dir(&self.mainline_repo)
                .output();
            return Err(RalphError::Merge(format!(
                "git merge failed without conflicts: {}",
                String::from_utf8_lossy(&merge_status.stderr)
            )));
        }

        let prompt = self
            .prompts
            .merge_resolution_prompt(source_branch, target_branch, &conflicts)?;

        let agent_result = self
            .agent
            .run(
                &self.mainline_repo,
                &prompt,
                AgentOptions {
                    timeout: self.merge_agent_timeout,
                    stdout_sink: StdoutSink::Discard,
                    cancellation: Some(self.cancellation.clone()),
                },
            )
            .await?;

        let remaining = conflicting_files(&self.mainline_repo)?;
        if !remaining.is_empty() || !agent_result.succeeded() {
            return self
                .abort_and_file_question(source_branch, target_branch, originating_bead_id, &remaining)
                .map(MergeOutcome::Conflict);
        }

        let commit_status = Command::new("git")
            .args(["commit", "--no-edit"])
            .current_dir(&self.mainline_repo)
            .output()
            .map_err(|e| RalphError::Merge(format!("failed to spawn git commit: {e}")))?;

        if commit_status.status.success() {
            Ok(MergeOutcome::ResolvedByAgent)
        } else {
            self.abort_and_file_question(source_branch, target_branch, originating_bead_id, &[])
                .map(MergeOutcome::Conflict)
        }
    }

    fn abort_and_file_question(
        &self,
        source_branch: &str,
        target_branch: &str,
        originating_bead_id: &str,
        _remaining: &[String],
    ) -> Result<String> {
        let _ = Command::new("git")
            .args(["merge", "--abort"])
            .current_dir(&self.mainline_repo)
            .output();

        let id = self.tracker.create_bead(&CreateBeadRequest {
            title: format!("Question: Merge conflicts in {source_branch} -> {target_branch}"),
            description: format!(
                "Automated merge of {source_branch} into {target_branch} left unresolved \
                 conflicts after an agent-driven resolution attempt. Manual intervention needed."
            ),
            issue_type: "question".to_string(),
            labels: vec![NEEDS_HUMAN_LABEL.to_string()],
            parent: Some(originating_bead_id.to_string()),
        })?;

        self.tracker.add_dependency(originating_bead_id, &id)?;

        Ok(id)
    }
}

fn current_branch(repo: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(repo)
        .output()
        .map_err(|e| RalphError::Merge(format!("failed to read current branch: {e}")))?;
    if !output.status.success() {
        return Err(RalphError::Merge(format!(
            "git rev-parse failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn checkout(repo: &Path, branch: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["checkout", branch])
        .current_dir(repo)
        .output()
        .map_err(|e| RalphError::Merge(format!("failed to spawn git checkout: {e}")))?;
    if !output.status.success() {
        return Err(RalphError::Merge(format!(
            "git checkout {branch} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn conflicting_files(repo: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["status", "--porcelain=v1"])
        .current_dir(repo)
        .output()
        .map_err(|e| RalphError::Merge(format!("failed to spawn git status: {e}")))?;
    if !output.status.success() {
        return Err(RalphError::Merge(format!(
            "git status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut files = Vec::new();
    for line in text.lines() {
        if line.len() < 3 {
            continue;
        }
        let code = &line[..2];
        if CONFLICT_CODES.contains(&code) {
            files.push(line[3..].trim().to_string());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentOptions, AgentResult, AgentRunner};
    use crate::bead::{Bead, BeadDetail, IssueStatus};
    use crate::prompt::PromptBuilder;
    use crate::tracker::{CreateBeadRequest, TrackerClient};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[test]
    fn recognizes_all_documented_conflict_codes() {
        for code in ["UU", "AA", "DD", "AU", "UA", "DU", "UD"] {
            assert!(CONFLICT_CODES.contains(&code));
        }
    }

    fn git(dir: &Path, args: &[&str]) {
        assert!(Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap()
            .success());
    }

    /// Leaves every conflict unresolved, as a real agent would if it
    /// gave up on the prompt.
    struct GiveUpAgent;

    #[async_trait]
    impl AgentRunner for GiveUpAgent {
        async fn run(
            &self,
            _workdir: &Path,
            _prompt: &str,
            _options: AgentOptions<'_>,
        ) -> Result<AgentResult> {
            Ok(AgentResult {
                exit_code: 1,
                duration: Duration::from_millis(1),
                stdout: String::new(),
                stderr_snippet: String::new(),
                chat_id: None,
                timed_out: false,
                error_message: None,
            })
        }
    }

    struct RecordingTracker {
        created: Mutex<Vec<CreateBeadRequest>>,
        dependencies: Mutex<Vec<(String, String)>>,
    }

    impl TrackerClient for RecordingTracker {
        fn ready_beads(&self, _parent: Option<&str>) -> Result<Vec<Bead>> {
            Ok(vec![])
        }
        fn show_bead(&self, id: &str) -> Result<BeadDetail> {
            Ok(BeadDetail {
                id: id.to_string(),
                title: id.to_string(),
                description: String::new(),
                status: IssueStatus::Open,
                priority: 0,
                labels: vec![],
                created_at: Utc::now(),
                issue_type: None,
                dependency_count: 0,
                dependencies: vec![],
                dependents: vec![],
            })
        }
        fn create_bead(&self, req: &CreateBeadRequest) -> Result<String> {
            self.created.lock().unwrap().push(req.clone());
            Ok("q-42".to_string())
        }
        fn add_dependency(&self, from: &str, to: &str) -> Result<()> {
            self.dependencies
                .lock()
                .unwrap()
                .push((from.to_string(), to.to_string()));
            Ok(())
        }
        fn sync(&self) {}
    }

    /// Builds a repo where `branch-a` merges into `main` cleanly, and
    /// `branch-b` (forked from the same pre-merge `main`, editing the
    /// same line) then conflicts.
    fn conflicting_repo() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        git(dir, &["init", "-q", "-b", "main"]);
        git(dir, &["config", "user.email", "ralph@example.com"]);
        git(dir, &["config", "user.name", "ralph"]);
        std::fs::write(dir.join("shared.txt"), "base\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", "initial"]);

        git(dir, &["checkout", "-b", "branch-a"]);
        std::fs::write(dir.join("shared.txt"), "base\nfrom-a\n").unwrap();
        git(dir, &["commit", "-aq", "-m", "branch-a edit"]);

        git(dir, &["checkout", "main"]);
        git(dir, &["checkout", "-b", "branch-b"]);
        std::fs::write(dir.join("shared.txt"), "base\nfrom-b\n").unwrap();
        git(dir, &["commit", "-aq", "-m", "branch-b edit"]);

        git(dir, &["checkout", "main"]);
        tmp
    }

    #[tokio::test]
    async fn clean_merge_then_conflicting_merge_files_a_question_bead() {
        let repo = conflicting_repo();
        let prompts = PromptBuilder::new().unwrap();
        let tracker = RecordingTracker {
            created: Mutex::new(vec![]),
            dependencies: Mutex::new(vec![]),
        };
        let agent = GiveUpAgent;
        let coordinator = MergeCoordinator::new(
            repo.path(),
            &prompts,
            &tracker,
            &agent,
            Duration::from_secs(5),
            crate::agent::CancellationToken::new(),
        );

        let first = coordinator
            .merge("branch-a", "main", "bead-1")
            .await
            .unwrap();
        assert_eq!(first, MergeOutcome::Clean);

        let second = coordinator
            .merge("branch-b", "main", "bead-2")
            .await
            .unwrap();
        match second {
            MergeOutcome::Conflict { question_bead_id } => assert_eq!(question_bead_id, "q-42"),
            other => panic!("expected a conflict, got {other:?}"),
        }

        // mainline was left clean: merge --abort ran, and the second
        // merge's own coordinator restored the original branch.
        let status = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        assert!(status.stdout.is_empty());
        assert_eq!(current_branch(repo.path()).unwrap(), "main");

        let created = tracker.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert!(created[0].labels.contains(&NEEDS_HUMAN_LABEL.to_string()));
        assert_eq!(created[0].parent.as_deref(), Some("bead-2"));

        let deps = tracker.dependencies.lock().unwrap();
        assert_eq!(deps[0], ("bead-2".to_string(), "q-42".to_string()));
    }
}
