//! Lifecycle events emitted during a plot run.
//!
//! `RunEvent` is advisory only: observers and the trace sink receive it, but
//! nothing they do influences control flow.

use serde::{Deserialize, Serialize};

use crate::record::FailureReason;

/// Events emitted while a plot runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunEvent {
    /// A step is about to be checked and executed.
    StepStart { id: String, step_type: String },

    /// A step finished successfully.
    StepOk {
        id: String,
        step_type: String,
        duration_ms: u64,
        attempts: u32,
    },

    /// A step failed; the run stops here.
    StepFail {
        id: String,
        step_type: String,
        duration_ms: u64,
        attempts: u32,
        reason: FailureReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// An attempt failed and another one is scheduled.
    Retry {
        id: String,
        attempt: u32,
        /// `timeout`, `rate-limit`, or `error`.
        cause: String,
        delay_ms: u64,
    },

    /// A gate selected a branch.
    Fork {
        from: String,
        next_id: Option<String>,
    },

    /// The run finished.
    Done { total_ms: u64 },
}

impl RunEvent {
    /// Short event name used in trace lines.
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::StepStart { .. } => "step-start",
            RunEvent::StepOk { .. } => "step-ok",
            RunEvent::StepFail { .. } => "step-fail",
            RunEvent::Retry { .. } => "retry",
            RunEvent::Fork { .. } => "fork",
            RunEvent::Done { .. } => "done",
        }
    }

    /// The step this event concerns, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            RunEvent::StepStart { id, .. }
            | RunEvent::StepOk { id, .. }
            | RunEvent::StepFail { id, .. }
            | RunEvent::Retry { id, .. } => Some(id),
            RunEvent::Fork { from, .. } => Some(from),
            RunEvent::Done { .. } => None,
        }
    }
}
