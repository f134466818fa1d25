//! Git worktree management — isolated, per-bead checkouts so parallel
//! agents never collide on the working tree.
//!
//! Adapted from the teacher's `WorktreeManager`: the git2 worktree and
//! branch creation code is kept nearly as-is, generalized to the
//! `ralph/<beadId>-<nonce>` branch naming and `Mainline`/`MainlineRepo`
//! lookups this spec needs that the teacher didn't have.

use crate::{RalphError, Result};
use git2::Repository;
use std::path::{Path, PathBuf};

/// Manages git worktrees for per-bead agent isolation.
pub struct WorktreeManager {
    repo_path: PathBuf,
    ralph_dir: PathBuf,
    mainline: String,
}

impl WorktreeManager {
    /// Initialize the worktree manager for a repository.
    pub fn new(repo_path: impl AsRef<Path>, mainline: impl Into<String>) -> Result<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        let ralph_dir = repo_path.join(".ralph");
        std::fs::create_dir_all(ralph_dir.join("worktrees"))?;

        Ok(Self {
            repo_path,
            ralph_dir,
            mainline: mainline.into(),
        })
    }

    pub fn mainline(&self) -> &str {
        &self.mainline
    }

    /// Resolve the path of the worktree whose HEAD is the mainline
    /// branch — the target for `MergeCoordinator`.
    pub fn mainline_repo(&self) -> Result<PathBuf> {
        for info in self.list_worktrees()? {
            if info.branch == self.mainline {
                return Ok(info.path);
            }
        }
        // No separate worktree checks out mainline: the primary
        // checkout at `repo_path` is the mainline-owning tree.
        Ok(self.repo_path.clone())
    }

    /// Create a new worktree for a bead, on a fresh branch off the
    /// current mainline tip.
    pub fn create_worktree(&self, bead_id: &str) -> Result<WorktreeInfo> {
        let repo = Repository::open(&self.repo_path)?;

        let nonce: String = (0..6)
            .map(|_| format!("{:x}", rand::random::<u8>() % 16))
            .collect();
        let worktree_name = format!("{bead_id}-{nonce}");
        let worktree_path = self.ralph_dir.join("worktrees").join(&worktree_name);
        let branch_name = format!("ralph/{bead_id}-{nonce}");

        if worktree_path.exists() {
            return Err(RalphError::Worktree(format!(
                "worktree path already exists: {}",
                worktree_path.display()
            )));
        }
        if repo
            .find_branch(&branch_name, git2::BranchType::Local)
            .is_ok()
        {
            return Err(RalphError::Worktree(format!(
                "branch already exists: {branch_name}"
            )));
        }

        let base_ref = repo
            .find_branch(&self.mainline, git2::BranchType::Local)
            .map_err(|e| {
                RalphError::Worktree(format!("mainline branch {} not found: {e}", self.mainline))
            })?;
        let base_commit = base_ref.get().peel_to_commit()?;

        let new_branch = repo.branch(&branch_name, &base_commit, false)?;
        let branch_ref = new_branch.into_reference();

        repo.worktree(
            &worktree_name,
            &worktree_path,
            Some(git2::WorktreeAddOptions::new().reference(Some(&branch_ref))),
        )?;

        Ok(WorktreeInfo {
            path: worktree_path,
            branch: branch_name,
            bead_id: bead_id.to_string(),
            worktree_name,
        })
    }

    /// Remove a worktree. Best-effort: the directory is always removed
    /// if present; a git prune failure is logged, not propagated, per
    /// spec §4.2 ("may leave orphan directories only if the VCS
    /// refuses removal").
    pub fn remove_worktree(&self, info: &WorktreeInfo) -> Result<()> {
        if let Ok(repo) = Repository::open(&self.repo_path) {
            if let Ok(worktree) = repo.find_worktree(&info.worktree_name) {
                if let Err(e) = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .working_tree(true)
                        .valid(true),
                )) {
                    tracing::warn!(
                        worktree = %info.worktree_name,
                        error = %e,
                        "git refused worktree prune, removing directory anyway"
                    );
                }
            }
        }

        if info.path.exists() {
            std::fs::remove_dir_all(&info.path)?;
        }

        Ok(())
    }

    /// List all active worktrees registered with git.
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>> {
        let repo = Repository::open(&self.repo_path)?;
        let mut worktrees = Vec::new();

        for name in repo.worktrees()?.iter().flatten() {
            if let Ok(worktree) = repo.find_worktree(name) {
                if let Some(path) = worktree.path().to_str() {
                    let branch = branch_for_worktree_path(Path::new(path))
                        .unwrap_or_else(|| name.to_string());
                    let bead_id = name.rsplit_once('-').map_or(name, |(id, _)| id).to_string();
                    worktrees.push(WorktreeInfo {
                        path: PathBuf::from(path),
                        branch,
                        bead_id,
                        worktree_name: name.to_string(),
                    });
                }
            }
        }

        Ok(worktrees)
    }

    pub fn ralph_dir(&self) -> &Path {
        &self.ralph_dir
    }
}

fn branch_for_worktree_path(worktree_path: &Path) -> Option<String> {
    let worktree_repo = Repository::open(worktree_path).ok()?;
    let head = worktree_repo.head().ok()?;
    head.shorthand().map(str::to_string)
}

/// Information about a single agent worktree.
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub bead_id: String,
    worktree_name: String,
}
