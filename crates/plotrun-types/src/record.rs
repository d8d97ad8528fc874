//! Run record and statistics types.
//!
//! A `RunRecord` is the faithful, replayable trace of one run: one
//! `StepRecord` per executed step, in execution order, ending at the first
//! failure. `RunStats` holds the aggregate counters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Final status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Fail,
}

// ---------------------------------------------------------------------------
// FailureReason
// ---------------------------------------------------------------------------

/// Why a step failed. Serialized as the bare reason string
/// (`timeout`, `rate-limit`, `BAD_INPUT:<detail>`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FailureReason {
    /// An attempt or the whole run exceeded its deadline.
    Timeout,
    /// The rate limiter denied every remaining attempt.
    RateLimit,
    /// The circuit breaker refused to let an attempt start.
    BreakerOpen,
    /// The handler failed for a non-timeout reason on every attempt.
    RetryExhausted,
    /// The pre-flight cost check failed.
    BudgetExceeded,
    /// The step's declared inputs were rejected.
    BadInput(String),
}

impl FailureReason {
    /// Whether this failure says anything about the protected resource.
    ///
    /// Budget exhaustion and an already-open breaker are excluded from
    /// breaker failure counting.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, FailureReason::BudgetExceeded | FailureReason::BreakerOpen)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::RateLimit => write!(f, "rate-limit"),
            FailureReason::BreakerOpen => write!(f, "breaker-open"),
            FailureReason::RetryExhausted => write!(f, "retry-exhausted"),
            FailureReason::BudgetExceeded => write!(f, "budget-exceeded"),
            FailureReason::BadInput(detail) => write!(f, "BAD_INPUT:{detail}"),
        }
    }
}

/// Error returned when parsing an unknown reason string.
#[derive(Debug, thiserror::Error)]
#[error("unknown failure reason: {0}")]
pub struct UnknownReason(pub String);

impl FromStr for FailureReason {
    type Err = UnknownReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(FailureReason::Timeout),
            "rate-limit" => Ok(FailureReason::RateLimit),
            "breaker-open" => Ok(FailureReason::BreakerOpen),
            "retry-exhausted" => Ok(FailureReason::RetryExhausted),
            "budget-exceeded" => Ok(FailureReason::BudgetExceeded),
            other => other
                .strip_prefix("BAD_INPUT:")
                .map(|detail| FailureReason::BadInput(detail.to_string()))
                .ok_or_else(|| UnknownReason(other.to_string())),
        }
    }
}

impl From<FailureReason> for String {
    fn from(reason: FailureReason) -> Self {
        reason.to_string()
    }
}

impl TryFrom<String> for FailureReason {
    type Error = UnknownReason;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// What happened to one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    /// Handler attempts actually started (0 when a pre-check failed).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Last handler error message, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// RunRecord
// ---------------------------------------------------------------------------

/// Complete record of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub plot_id: String,
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    #[serde(rename = "final")]
    pub final_state: FinalState,
}

/// Final run state (the visible context).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalState {
    pub ctx: Value,
}

impl RunRecord {
    /// Create an empty record for a run that is starting now.
    pub fn new(plot_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            plot_id: plot_id.into(),
            trace_id: trace_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            final_state: FinalState::default(),
        }
    }

    /// Records that did not end `ok`.
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.is_ok())
    }
}

// ---------------------------------------------------------------------------
// RunStats
// ---------------------------------------------------------------------------

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_ms: u64,
    pub steps: u32,
    pub ok: u32,
    pub failed: u32,
    /// Sum of `attempts - 1` over all records.
    pub retries: u32,
    /// Sum of cost estimates over ok steps.
    pub cost: f64,
}

impl RunStats {
    /// Account for a finished step. `cost` is charged only when the step is ok.
    pub fn observe(&mut self, record: &StepRecord, cost: f64) {
        self.steps += 1;
        self.retries += record.attempts.saturating_sub(1);
        match record.status {
            StepStatus::Ok => {
                self.ok += 1;
                self.cost += cost;
            }
            StepStatus::Fail => self.failed += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
