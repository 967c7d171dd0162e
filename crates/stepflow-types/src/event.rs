//! Event types for the workflow event bus.
//!
//! `WorkflowEvent` is broadcast by the engine as a workflow moves through its
//! lifecycle. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use serde::{Deserialize, Serialize};

/// Events emitted while the engine drives a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The engine claimed the workflow and started its step loop.
    WorkflowStarted {
        logical_id: String,
        /// Whole-workflow retry attempt this run belongs to (0 = first run).
        retry_attempt: u32,
    },

    /// A step attempt is starting.
    StepStarted {
        logical_id: String,
        step_id: String,
        /// 0-based attempt number.
        attempt: u32,
    },

    /// A step finished successfully.
    StepCompleted {
        logical_id: String,
        step_id: String,
        duration_ms: u64,
    },

    /// A step attempt failed.
    StepFailed {
        logical_id: String,
        step_id: String,
        error: String,
        will_retry: bool,
    },

    /// A step's condition evaluated false.
    StepSkipped { logical_id: String, step_id: String },

    /// A step was left for later because prerequisites are not completed.
    StepDeferred {
        logical_id: String,
        step_id: String,
        waiting_on: Vec<String>,
    },

    /// Every step was processed.
    WorkflowCompleted { logical_id: String },

    /// A step exhausted its retries and the workflow failed.
    WorkflowFailed {
        logical_id: String,
        step_id: String,
        error: String,
    },

    /// The workflow was reset to `pending` for another whole-workflow run.
    WorkflowRetryScheduled {
        logical_id: String,
        retry_attempt: u32,
        max_retries: u32,
    },

    /// The workflow was cancelled, or a run observed the cancellation.
    WorkflowCancelled { logical_id: String },
}

impl WorkflowEvent {
    /// Logical ID of the workflow the event belongs to.
    pub fn logical_id(&self) -> &str {
        match self {
            WorkflowEvent::WorkflowStarted { logical_id, .. }
            | WorkflowEvent::StepStarted { logical_id, .. }
            | WorkflowEvent::StepCompleted { logical_id, .. }
            | WorkflowEvent::StepFailed { logical_id, .. }
            | WorkflowEvent::StepSkipped { logical_id, .. }
            | WorkflowEvent::StepDeferred { logical_id, .. }
            | WorkflowEvent::WorkflowCompleted { logical_id }
            | WorkflowEvent::WorkflowFailed { logical_id, .. }
            | WorkflowEvent::WorkflowRetryScheduled { logical_id, .. }
            | WorkflowEvent::WorkflowCancelled { logical_id } => logical_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = WorkflowEvent::StepSkipped {
            logical_id: "nightly".to_string(),
            step_id: "publish".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "step_skipped", "logical_id": "nightly", "step_id": "publish"})
        );
    }

    #[test]
    fn test_logical_id_accessor() {
        let event = WorkflowEvent::WorkflowRetryScheduled {
            logical_id: "nightly".to_string(),
            retry_attempt: 1,
            max_retries: 3,
        };
        assert_eq!(event.logical_id(), "nightly");
    }
}
