//! `Outcome` classification and the `OutcomeAssessor` decision
//! procedure (spec §4.5).

use crate::agent::AgentResult;
use crate::bead::BeadDetail;
use crate::tracker::TrackerClient;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Post-run classification of a bead. Encodes to/from the lowercase
/// tags in spec §6 — unmarshalling any other string, or any non-string
/// JSON kind, is an error (spec P6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Question,
    Failure,
    Timeout,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Question => "question",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Outcome::Success),
            "question" => Some(Outcome::Question),
            "failure" => Some(Outcome::Failure),
            "timeout" => Some(Outcome::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Outcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutcomeVisitor;

        impl Visitor<'_> for OutcomeVisitor {
            type Value = Outcome;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "one of \"success\", \"question\", \"failure\", \"timeout\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Outcome, E> {
                Outcome::from_str(value)
                    .ok_or_else(|| de::Error::unknown_variant(value, &["success", "question", "failure", "timeout"]))
            }
        }

        deserializer.deserialize_str(OutcomeVisitor)
    }
}

/// Classifies the post-run state of a bead into an `Outcome`, applying
/// the priority-ordered, short-circuit decision procedure of spec
/// §4.5.
pub struct OutcomeAssessor<'a> {
    tracker: &'a dyn TrackerClient,
}

impl<'a> OutcomeAssessor<'a> {
    pub fn new(tracker: &'a dyn TrackerClient) -> Self {
        Self { tracker }
    }

    /// Assess one bead's outcome and produce a short human summary.
    pub fn assess(&self, bead_id: &str, agent_result: &AgentResult) -> (Outcome, String) {
        // 1. Timeout always wins, even over a bead the agent managed to close.
        if agent_result.timed_out {
            return (Outcome::Timeout, "agent invocation timed out".to_string());
        }

        // 2. Unreadable/malformed tracker state is a failure.
        let detail = match self.tracker.show_bead(bead_id) {
            Ok(d) => d,
            Err(e) => {
                return (
                    Outcome::Failure,
                    format!("failed to re-fetch bead after run: {e}"),
                );
            }
        };

        self.assess_detail(&detail, agent_result)
    }

    /// Same decision procedure, given an already-fetched `BeadDetail`
    /// (used by tests and by the `verify` prompt's audit pass).
    pub fn assess_detail(&self, detail: &BeadDetail, agent_result: &AgentResult) -> (Outcome, String) {
        if agent_result.timed_out {
            return (Outcome::Timeout, "agent invocation timed out".to_string());
        }

        // 3. A visible human-gated blocker always surfaces as a question.
        let blockers = detail.open_human_gated_neighbors();
        if !blockers.is_empty() {
            let names: Vec<&str> = blockers.into_iter().collect();
            return (
                Outcome::Question,
                format!("open needs-human bead(s): {}", names.join(", ")),
            );
        }

        // 4. Non-zero exit is a failure.
        if agent_result.exit_code != 0 {
            return (
                Outcome::Failure,
                format!("agent exited with code {}", agent_result.exit_code),
            );
        }

        // 5. Closed bead with a clean exit is success.
        if detail.status.is_closed() {
            return (Outcome::Success, "bead closed".to_string());
        }

        // 6. Clean exit but bead left open: the agent did not do its job.
        (
            Outcome::Failure,
            "agent exited cleanly but bead was not closed".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bead::{DependencyRef, IssueStatus};
    use crate::tracker::{CreateBeadRequest, TrackerClient};
    use chrono::Utc;
    use std::time::Duration;

    struct FakeTracker;
    impl TrackerClient for FakeTracker {
        fn ready_beads(&self, _parent: Option<&str>) -> crate::Result<Vec<crate::bead::Bead>> {
            Ok(vec![])
        }
        fn show_bead(&self, _id: &str) -> crate::Result<BeadDetail> {
            unreachable!("tests use assess_detail directly")
        }
        fn create_bead(&self, _req: &CreateBeadRequest) -> crate::Result<String> {
            Ok("q-1".to_string())
        }
        fn add_dependency(&self, _from: &str, _to: &str) -> crate::Result<()> {
            Ok(())
        }
        fn sync(&self) {}
    }

    fn detail(status: IssueStatus, neighbors: Vec<DependencyRef>) -> BeadDetail {
        BeadDetail {
            id: "b-1".to_string(),
            title: "t".to_string(),
            description: String::new(),
            status,
            priority: 0,
            labels: vec![],
            created_at: Utc::now(),
            issue_type: None,
            dependency_count: 0,
            dependencies: vec![],
            dependents: neighbors,
        }
    }

    fn agent_result(exit_code: i32, timed_out: bool) -> AgentResult {
        AgentResult {
            exit_code,
            duration: Duration::from_secs(1),
            stdout: String::new(),
            stderr_snippet: String::new(),
            chat_id: None,
            timed_out,
            error_message: None,
        }
    }

    fn dep(id: &str, status: IssueStatus, labels: &[&str]) -> DependencyRef {
        DependencyRef {
            id: id.to_string(),
            title: id.to_string(),
            status,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            dependency_type: "blocks".to_string(),
        }
    }

    #[test]
    fn timeout_wins_over_everything() {
        let tracker = FakeTracker;
        let assessor = OutcomeAssessor::new(&tracker);
        let detail = detail(IssueStatus::Closed, vec![]);
        let (outcome, _) = assessor.assess_detail(&detail, &agent_result(0, true));
        assert_eq!(outcome, Outcome::Timeout);
    }

    #[test]
    fn needs_human_wins_even_if_closed() {
        let tracker = FakeTracker;
        let assessor = OutcomeAssessor::new(&tracker);
        let detail = detail(
            IssueStatus::Closed,
            vec![dep("q-1", IssueStatus::Open, &["needs-human"])],
        );
        let (outcome, _) = assessor.assess_detail(&detail, &agent_result(0, false));
        assert_eq!(outcome, Outcome::Question);
    }

    #[test]
    fn closed_needs_human_does_not_block() {
        let tracker = FakeTracker;
        let assessor = OutcomeAssessor::new(&tracker);
        let detail = detail(
            IssueStatus::Closed,
            vec![dep("q-1", IssueStatus::Closed, &["needs-human"])],
        );
        let (outcome, _) = assessor.assess_detail(&detail, &agent_result(0, false));
        assert_eq!(outcome, Outcome::Success);
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let tracker = FakeTracker;
        let assessor = OutcomeAssessor::new(&tracker);
        let detail = detail(IssueStatus::Closed, vec![]);
        let (outcome, _) = assessor.assess_detail(&detail, &agent_result(1, false));
        assert_eq!(outcome, Outcome::Failure);
    }

    #[test]
    fn clean_exit_with_closed_bead_is_success() {
        let tracker = FakeTracker;
        let assessor = OutcomeAssessor::new(&tracker);
        let detail = detail(IssueStatus::Closed, vec![]);
        let (outcome, _) = assessor.assess_detail(&detail, &agent_result(0, false));
        assert_eq!(outcome, Outcome::Success);
    }

    #[test]
    fn clean_exit_with_open_bead_is_failure() {
        let tracker = FakeTracker;
        let assessor = OutcomeAssessor::new(&tracker);
        let detail = detail(IssueStatus::Open, vec![]);
        let (outcome, _) = assessor.assess_detail(&detail, &agent_result(0, false));
        assert_eq!(outcome, Outcome::Failure);
    }

    #[test]
    fn round_trips_all_variants() {
        for outcome in [Outcome::Success, Outcome::Question, Outcome::Failure, Outcome::Timeout] {
            let json = serde_json::to_string(&outcome).unwrap();
            let back: Outcome = serde_json::from_str(&json).unwrap();
            assert_eq!(outcome, back);
        }
    }

    #[test]
    fn rejects_unknown_string() {
        let result: Result<Outcome, _> = serde_json::from_str("\"unknown\"");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_string_kinds() {
        assert!(serde_json::from_str::<Outcome>("123").is_err());
        assert!(serde_json::from_str::<Outcome>("null").is_err());
    }
}
