//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! views and loggers can follow a run without reaching into its state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use payrun_types::TargetPage;

/// Events emitted while a payroll run is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        step_count: usize,
    },
    StepStarted {
        step_id: String,
        index: usize,
    },
    StepCompleted {
        step_id: String,
        index: usize,
        duration_ms: u64,
    },
    StepFlagged {
        step_id: String,
        index: usize,
        flag_count: usize,
    },
    CheckpointReached {
        step_id: String,
        index: usize,
    },
    StepOverridden {
        step_id: String,
        flag_count: usize,
    },
    RemediationRequested {
        step_id: String,
        page: TargetPage,
    },
    ConfirmationRequested {
        step_id: String,
    },
    ApprovalReceived {
        step_id: String,
        approved: bool,
    },
    Progress {
        percent: u8,
    },
    RunCompleted {
        run_id: Uuid,
    },
    RunDiscarded {
        run_id: Uuid,
        step_in_flight: Option<String>,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::CheckpointReached {
            step_id: "gross_to_net".into(),
            index: 5,
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::CheckpointReached { step_id, index } => {
                assert_eq!(step_id, "gross_to_net");
                assert_eq!(index, 5);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::Progress { percent: 11 });
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(PipelineEvent::StepFlagged {
            step_id: "pre_processing".into(),
            index: 0,
            flag_count: 2,
        })
        .unwrap();
        assert_eq!(json["event"], "step_flagged");
        assert_eq!(json["flag_count"], 2);
    }
}
