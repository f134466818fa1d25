//! Bead data model — the unit of work read from and mutated in the
//! external tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Label attached to beads that should escalate to a human rather than
/// be silently retried.
pub const NEEDS_HUMAN_LABEL: &str = "needs-human";

/// Tracker status of a bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Closed,
    #[serde(other)]
    Other,
}

impl IssueStatus {
    pub fn is_closed(self) -> bool {
        matches!(self, IssueStatus::Closed)
    }
}

/// A bead as returned by `ready`/`show`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub title: String,
    pub status: IssueStatus,
    pub priority: i64,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "issue_type")]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub dependency_count: u32,
}

impl Bead {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn needs_human(&self) -> bool {
        self.has_label(NEEDS_HUMAN_LABEL)
    }

    /// Order beads the way every batcher must: priority ascending, then
    /// creation time ascending.
    pub fn ready_order_key(&self) -> (i64, DateTime<Utc>) {
        (self.priority, self.created_at)
    }
}

/// A dependency or dependent entry embedded in a `show` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRef {
    pub id: String,
    pub title: String,
    pub status: IssueStatus,
    #[serde(default)]
    pub labels: Vec<String>,
    pub dependency_type: String,
}

impl DependencyRef {
    pub fn is_open(&self) -> bool {
        !self.status.is_closed()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Full bead record returned by `show`, including the dependency graph
/// edges relevant to readiness and outcome assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadDetail {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: IssueStatus,
    pub priority: i64,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub dependency_count: u32,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default)]
    pub dependents: Vec<DependencyRef>,
}

impl BeadDetail {
    /// A bead is ready when it isn't closed and has no open blocker.
    pub fn is_ready(&self) -> bool {
        !self.status.is_closed()
            && !self
                .dependencies
                .iter()
                .any(|d| d.dependency_type == "blocks" && d.is_open())
    }

    /// Dependencies and dependents that are open and labelled
    /// `needs-human` — these surface as `Outcome::Question` (spec §4.5
    /// rule 3), regardless of which direction the edge points.
    pub fn open_human_gated_neighbors(&self) -> HashSet<&str> {
        self.dependencies
            .iter()
            .chain(self.dependents.iter())
            .filter(|d| d.is_open() && d.has_label(NEEDS_HUMAN_LABEL))
            .map(|d| d.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(id: &str, status: IssueStatus, labels: &[&str], kind: &str) -> DependencyRef {
        DependencyRef {
            id: id.to_string(),
            title: id.to_string(),
            status,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            dependency_type: kind.to_string(),
        }
    }

    fn detail(status: IssueStatus, deps: Vec<DependencyRef>) -> BeadDetail {
        BeadDetail {
            id: "b-1".to_string(),
            title: "t".to_string(),
            description: String::new(),
            status,
            priority: 0,
            labels: vec![],
            created_at: Utc::now(),
            issue_type: None,
            dependency_count: deps.len() as u32,
            dependencies: deps,
            dependents: vec![],
        }
    }

    #[test]
    fn ready_when_open_with_no_blocker() {
        let b = detail(IssueStatus::Open, vec![]);
        assert!(b.is_ready());
    }

    #[test]
    fn not_ready_with_open_blocker() {
        let b = detail(
            IssueStatus::Open,
            vec![dep("b-2", IssueStatus::Open, &[], "blocks")],
        );
        assert!(!b.is_ready());
    }

    #[test]
    fn ready_when_blocker_closed() {
        let b = detail(
            IssueStatus::Open,
            vec![dep("b-2", IssueStatus::Closed, &[], "blocks")],
        );
        assert!(b.is_ready());
    }

    #[test]
    fn closed_bead_never_ready() {
        let b = detail(IssueStatus::Closed, vec![]);
        assert!(!b.is_ready());
    }

    #[test]
    fn open_needs_human_dependent_detected() {
        let mut b = detail(IssueStatus::Closed, vec![]);
        b.dependents
            .push(dep("q-1", IssueStatus::Open, &[NEEDS_HUMAN_LABEL], "blocks"));
        assert_eq!(b.open_human_gated_neighbors(), HashSet::from(["q-1"]));
    }

    #[test]
    fn closed_needs_human_dependent_ignored() {
        let mut b = detail(IssueStatus::Closed, vec![]);
        b.dependents.push(dep(
            "q-1",
            IssueStatus::Closed,
            &[NEEDS_HUMAN_LABEL],
            "blocks",
        ));
        assert!(b.open_human_gated_neighbors().is_empty());
    }
}
