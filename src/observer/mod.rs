//! Progress/observer model (spec §4.9, §9 redesign note).
//!
//! A single sum-type `Event` pushed onto one sink, not a wide trait
//! with many optional no-op methods — mirroring the teacher's
//! `DaemonCommand`/`DaemonResponse` tagged-enum idiom
//! (`daemon/ipc.rs`). Observers must never block the worker that
//! raised the event; a panic inside a sink is caught and logged, never
//! propagated (spec §7 ObserverError).

use crate::agent::ToolEvent;
use crate::bead::Bead;
use crate::runner::{BeadResult, RunSummary};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

/// A lifecycle notification raised during a run.
#[derive(Debug, Clone)]
pub enum Event {
    LoopStart { root_bead: Option<String> },
    LoopEnd { summary: RunSummary },
    BeadStart { bead: Bead },
    BeadComplete { result: BeadResult },
    ToolStart { bead_id: String, event: ToolEvent },
    ToolEnd { bead_id: String, event: ToolEvent },
}

/// Receives `Event`s raised by the runner. Implementations must be
/// cheap and non-blocking; `Runner` calls `notify` synchronously from
/// whichever worker raised the event.
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Fan out one event to many observers, isolating a panicking sink
/// from the others and from the caller.
pub struct FanOut {
    sinks: Vec<Box<dyn ProgressObserver>>,
}

impl FanOut {
    pub fn new(sinks: Vec<Box<dyn ProgressObserver>>) -> Self {
        Self { sinks }
    }
}

impl ProgressObserver for FanOut {
    fn notify(&self, event: &Event) {
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.notify(event))).is_err() {
                tracing::error!("observer panicked while handling event; isolated");
            }
        }
    }
}

/// Emits one structured log line per event at a level appropriate to
/// its severity, matching the teacher's `tracing` usage elsewhere.
pub struct LoggingObserver;

impl ProgressObserver for LoggingObserver {
    fn notify(&self, event: &Event) {
        match event {
            Event::LoopStart { root_bead } => {
                tracing::info!(root_bead = ?root_bead, "loop started");
            }
            Event::LoopEnd { summary } => {
                tracing::info!(?summary, "loop ended");
            }
            Event::BeadStart { bead } => {
                tracing::info!(bead_id = %bead.id, title = %bead.title, "bead started");
            }
            Event::BeadComplete { result } => {
                tracing::info!(
                    bead_id = %result.bead.id,
                    outcome = %result.outcome,
                    duration_ms = result.agent_result.duration.as_millis() as u64,
                    "bead completed"
                );
            }
            Event::ToolStart { bead_id, event } => {
                tracing::debug!(bead_id = %bead_id, call_id = %event.call_id, kind = ?event.kind, "tool started");
            }
            Event::ToolEnd { bead_id, event } => {
                tracing::debug!(bead_id = %bead_id, call_id = %event.call_id, kind = ?event.kind, "tool ended");
            }
        }
    }
}

/// Collects every event in order, for tests.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn notify(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicky;
    impl ProgressObserver for Panicky {
        fn notify(&self, _event: &Event) {
            panic!("boom");
        }
    }

    #[test]
    fn fan_out_isolates_a_panicking_sink() {
        let recorder = RecordingObserver::new();
        let fan_out = FanOut::new(vec![Box::new(Panicky), Box::new(recorder)]);
        // Should not panic despite the first sink panicking.
        fan_out.notify(&Event::LoopStart { root_bead: None });
    }

    #[test]
    fn recording_observer_preserves_order() {
        let recorder = RecordingObserver::new();
        recorder.notify(&Event::LoopStart { root_bead: None });
        recorder.notify(&Event::LoopStart {
            root_bead: Some("epic-1".to_string()),
        });
        let events = recorder.events();
        assert_eq!(events.len(), 2);
    }
}
