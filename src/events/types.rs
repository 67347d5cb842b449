//! The closed vocabulary of observable activity (spec.md §6.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in the run's append-only timeline.
///
/// `kind` is carried as the serde tag `event` so the on-disk JSONL shape is
/// `{"ts": ..., "event": "task.started", ...payload}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    #[serde(rename = "session.started")]
    SessionStarted { session_id: String },
    #[serde(rename = "session.ended")]
    SessionEnded { status: String, tasks_completed: u32, tasks_failed: u32 },

    #[serde(rename = "task.started")]
    TaskStarted { task_id: String },
    #[serde(rename = "task.completed")]
    TaskCompleted { task_id: String },
    #[serde(rename = "task.failed")]
    TaskFailed { task_id: String, reason: String },

    #[serde(rename = "agent.started")]
    AgentStarted { task_id: String, role: String, iteration: u32 },
    #[serde(rename = "agent.output")]
    AgentOutput { task_id: String, role: String, line: String, is_stderr: bool },
    #[serde(rename = "agent.completed")]
    AgentCompleted { task_id: String, role: String, signal: Option<String> },
    #[serde(rename = "agent.failed")]
    AgentFailed { task_id: String, role: String, reason: String },

    #[serde(rename = "signal.accepted")]
    SignalAccepted { task_id: String, kind: String },
    #[serde(rename = "signal.rejected")]
    SignalRejected { task_id: String, reason: String },

    #[serde(rename = "guardrail.revert")]
    GuardrailRevert { task_id: String, path: String, reason: String },

    #[serde(rename = "gates.started")]
    GatesStarted { task_id: String, phase: String },
    #[serde(rename = "gate.pass")]
    GatePass { task_id: String, gate: String, duration_ms: u64 },
    #[serde(rename = "gate.fail")]
    GateFail {
        task_id: String,
        gate: String,
        fatal: bool,
        duration_ms: u64,
        output_tail: String,
    },
    #[serde(rename = "gates.completed")]
    GatesCompleted { task_id: String, all_fatal_passed: bool },

    #[serde(rename = "service.starting")]
    ServiceStarting { service: String },
    #[serde(rename = "service.ready")]
    ServiceReady { service: String },
    #[serde(rename = "service.failed")]
    ServiceFailed { service: String, reason: String },

    #[serde(rename = "ui-test.started")]
    UiTestStarted { name: String },
    #[serde(rename = "ui-test.pass")]
    UiTestPass { name: String },
    #[serde(rename = "ui-test.fail")]
    UiTestFail { name: String, reason: String },

    #[serde(rename = "fix-loop.started")]
    FixLoopStarted { task_id: String, gate: String },
    #[serde(rename = "fix-loop.iteration")]
    FixLoopIteration { task_id: String, attempt: u32 },
    #[serde(rename = "fix-loop.ended")]
    FixLoopEnded { task_id: String, resolved: bool },

    #[serde(rename = "checksum.verified")]
    ChecksumVerified,
    #[serde(rename = "checksum.failed")]
    ChecksumFailed { expected: String, actual: String },

    #[serde(rename = "iteration.started")]
    IterationStarted { task_id: String, phase: String, iteration: u32 },
    #[serde(rename = "iteration.ended")]
    IterationEnded { task_id: String, phase: String, iteration: u32 },
}

impl Event {
    /// The `event` tag, e.g. `"task.completed"` — useful for tests and filters.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionStarted { .. } => "session.started",
            Event::SessionEnded { .. } => "session.ended",
            Event::TaskStarted { .. } => "task.started",
            Event::TaskCompleted { .. } => "task.completed",
            Event::TaskFailed { .. } => "task.failed",
            Event::AgentStarted { .. } => "agent.started",
            Event::AgentOutput { .. } => "agent.output",
            Event::AgentCompleted { .. } => "agent.completed",
            Event::AgentFailed { .. } => "agent.failed",
            Event::SignalAccepted { .. } => "signal.accepted",
            Event::SignalRejected { .. } => "signal.rejected",
            Event::GuardrailRevert { .. } => "guardrail.revert",
            Event::GatesStarted { .. } => "gates.started",
            Event::GatePass { .. } => "gate.pass",
            Event::GateFail { .. } => "gate.fail",
            Event::GatesCompleted { .. } => "gates.completed",
            Event::ServiceStarting { .. } => "service.starting",
            Event::ServiceReady { .. } => "service.ready",
            Event::ServiceFailed { .. } => "service.failed",
            Event::UiTestStarted { .. } => "ui-test.started",
            Event::UiTestPass { .. } => "ui-test.pass",
            Event::UiTestFail { .. } => "ui-test.fail",
            Event::FixLoopStarted { .. } => "fix-loop.started",
            Event::FixLoopIteration { .. } => "fix-loop.iteration",
            Event::FixLoopEnded { .. } => "fix-loop.ended",
            Event::ChecksumVerified => "checksum.verified",
            Event::ChecksumFailed { .. } => "checksum.failed",
            Event::IterationStarted { .. } => "iteration.started",
            Event::IterationEnded { .. } => "iteration.ended",
        }
    }
}

/// A timestamped envelope around an [`Event`], the unit persisted to JSONL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl TimelineEntry {
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_matches_tag() {
        let e = Event::TaskCompleted {
            task_id: "T-001".into(),
        };
        assert_eq!(e.kind(), "task.completed");

        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"event\":\"task.completed\""));
    }

    #[test]
    fn timeline_entry_round_trips() {
        let entry = TimelineEntry::new(Event::ChecksumFailed {
            expected: "abc".into(),
            actual: "def".into(),
        });
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: TimelineEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event.kind(), "checksum.failed");
    }
}
