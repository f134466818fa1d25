//! Batch production strategies (spec §4.7).
//!
//! Each call returns the next batch of bead ids to dispatch: a
//! non-empty batch, an empty batch (meaning "skip, try again"), or
//! `None` for end-of-stream. All four strategies are deterministic
//! given a fixed ready-list order (priority asc, created_at asc),
//! which `TrackerClient::ready_beads` already guarantees.

use crate::bead::Bead;
use crate::tracker::TrackerClient;
use crate::Result;
use std::collections::HashSet;

/// A lazy, stateful producer of bead batches.
pub trait Batcher: Send {
    /// Produce the next batch, or `None` at end-of-stream.
    fn next_batch(&mut self, tracker: &dyn TrackerClient) -> Result<Option<Vec<Bead>>>;
}

/// Yields a single specified bead once.
pub struct Targeted {
    bead_id: Option<String>,
}

impl Targeted {
    pub fn new(bead_id: impl Into<String>) -> Self {
        Self {
            bead_id: Some(bead_id.into()),
        }
    }
}

impl Batcher for Targeted {
    fn next_batch(&mut self, tracker: &dyn TrackerClient) -> Result<Option<Vec<Bead>>> {
        let Some(id) = self.bead_id.take() else {
            return Ok(None);
        };
        let detail = tracker.show_bead(&id)?;
        Ok(Some(vec![Bead {
            id: detail.id,
            title: detail.title,
            status: detail.status,
            priority: detail.priority,
            labels: detail.labels,
            created_at: detail.created_at,
            issue_type: detail.issue_type,
            dependency_count: detail.dependency_count,
        }]))
    }
}

/// Yields one ready bead per call; maintains its own skipped set. If the
/// ready list's next eligible candidate is the same id this strategy
/// yielded last call — meaning nothing advanced it out of the ready
/// list, most likely because the agent didn't close it — that id is
/// marked permanently skipped and this call returns an empty batch
/// (the Runner's cue to loop again without dispatching), so the
/// following call picks up the next distinct ready bead instead.
pub struct Sequential {
    skipped: HashSet<String>,
    last_yielded: Option<String>,
}

impl Sequential {
    pub fn new() -> Self {
        Self {
            skipped: HashSet::new(),
            last_yielded: None,
        }
    }

    /// Mark a bead as skipped so it is never yielded again.
    pub fn skip(&mut self, bead_id: &str) {
        self.skipped.insert(bead_id.to_string());
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Batcher for Sequential {
    fn next_batch(&mut self, tracker: &dyn TrackerClient) -> Result<Option<Vec<Bead>>> {
        let ready = tracker.ready_beads(None)?;
        let Some(candidate) = ready.into_iter().find(|b| !self.skipped.contains(&b.id)) else {
            return Ok(None);
        };

        if self.last_yielded.as_deref() == Some(candidate.id.as_str()) {
            self.skipped.insert(candidate.id);
            self.last_yielded = None;
            return Ok(Some(Vec::new()));
        }

        self.last_yielded = Some(candidate.id.clone());
        Ok(Some(vec![candidate]))
    }
}

/// Yields all currently ready beads at once; a bead is never returned
/// in more than one batch.
pub struct Wave {
    processed: HashSet<String>,
}

impl Wave {
    pub fn new() -> Self {
        Self {
            processed: HashSet::new(),
        }
    }
}

impl Default for Wave {
    fn default() -> Self {
        Self::new()
    }
}

impl Batcher for Wave {
    fn next_batch(&mut self, tracker: &dyn TrackerClient) -> Result<Option<Vec<Bead>>> {
        let ready: Vec<Bead> = tracker
            .ready_beads(None)?
            .into_iter()
            .filter(|b| !self.processed.contains(&b.id))
            .collect();
        if ready.is_empty() {
            return Ok(None);
        }
        for bead in &ready {
            self.processed.insert(bead.id.clone());
        }
        Ok(Some(ready))
    }
}

/// Yields one ready child of a named epic per call.
pub struct Epic {
    epic_id: String,
    processed: HashSet<String>,
}

impl Epic {
    pub fn new(epic_id: impl Into<String>) -> Self {
        Self {
            epic_id: epic_id.into(),
            processed: HashSet::new(),
        }
    }
}

impl Batcher for Epic {
    fn next_batch(&mut self, tracker: &dyn TrackerClient) -> Result<Option<Vec<Bead>>> {
        let ready = tracker.ready_beads(Some(&self.epic_id))?;
        match ready
            .into_iter()
            .find(|b| !self.processed.contains(&b.id))
        {
            Some(bead) => {
                self.processed.insert(bead.id.clone());
                Ok(Some(vec![bead]))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bead::{BeadDetail, IssueStatus};
    use crate::tracker::CreateBeadRequest;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    struct FakeTracker {
        ready: Mutex<Vec<Bead>>,
    }

    fn bead(id: &str, priority: i64) -> Bead {
        Bead {
            id: id.to_string(),
            title: id.to_string(),
            status: IssueStatus::Open,
            priority,
            labels: vec![],
            created_at: DateTime::<Utc>::from_timestamp(priority, 0).unwrap(),
            issue_type: None,
            dependency_count: 0,
        }
    }

    impl TrackerClient for FakeTracker {
        fn ready_beads(&self, _parent: Option<&str>) -> Result<Vec<Bead>> {
            Ok(self.ready.lock().unwrap().clone())
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
        fn create_bead(&self, _req: &CreateBeadRequest) -> Result<String> {
            Ok("q-1".to_string())
        }
        fn add_dependency(&self, _from: &str, _to: &str) -> Result<()> {
            Ok(())
        }
        fn sync(&self) {}
    }

    #[test]
    fn targeted_yields_once_then_ends() {
        let tracker = FakeTracker {
            ready: Mutex::new(vec![]),
        };
        let mut batcher = Targeted::new("b-1");
        let batch = batcher.next_batch(&tracker).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "b-1");
        assert!(batcher.next_batch(&tracker).unwrap().is_none());
    }

    #[test]
    fn sequential_skips_marked_bead() {
        let tracker = FakeTracker {
            ready: Mutex::new(vec![bead("b-1", 1), bead("b-2", 2)]),
        };
        let mut batcher = Sequential::new();
        batcher.skip("b-1");
        let batch = batcher.next_batch(&tracker).unwrap().unwrap();
        assert_eq!(batch[0].id, "b-2");
    }

    #[test]
    fn wave_never_repeats_a_processed_bead() {
        let tracker = FakeTracker {
            ready: Mutex::new(vec![bead("b-1", 1), bead("b-2", 2)]),
        };
        let mut batcher = Wave::new();
        let first = batcher.next_batch(&tracker).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        // still "ready" per tracker, but already processed by the wave
        let second = batcher.next_batch(&tracker).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn epic_yields_one_child_at_a_time() {
        let tracker = FakeTracker {
            ready: Mutex::new(vec![bead("c-1", 1), bead("c-2", 2)]),
        };
        let mut batcher = Epic::new("epic-1");
        let first = batcher.next_batch(&tracker).unwrap().unwrap();
        assert_eq!(first[0].id, "c-1");
        let second = batcher.next_batch(&tracker).unwrap().unwrap();
        assert_eq!(second[0].id, "c-2");
    }
}
