//! Plot domain types.
//!
//! A `Plot` is the declarative workflow document: an ordered list of steps,
//! the first of which is the entry point. Each `Step` carries its dispatch
//! key (`type`), handler-specific `inputs`, and the resilience policy applied
//! by the step execution core (timeout, retry, breaker, rate limit, cost).
//!
//! The JSON shape uses camelCase keys:
//!
//! ```json
//! {
//!   "id": "greet",
//!   "version": "1",
//!   "steps": [
//!     { "id": "s1", "type": "transform", "inputs": { "assign": { "greeting": "Hello" } }, "next": "s2" },
//!     { "id": "s2", "type": "gate", "inputs": { "path": "greeting", "op": "===", "value": "Hello" } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Plot
// ---------------------------------------------------------------------------

/// The declarative step graph executed by the plot runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plot {
    /// Plot identifier, echoed into the run record.
    #[serde(default = "default_plot_id")]
    pub id: String,
    /// Free-form document version.
    #[serde(default)]
    pub version: String,
    /// Ordered steps; the first one is the entry point.
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_plot_id() -> String {
    "unknown".to_string()
}

impl Plot {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The entry step (first declared).
    pub fn entry(&self) -> Option<&Step> {
        self.steps.first()
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single node of a plot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step id, unique within a plot. Fan-out sub-step templates may omit it.
    #[serde(default)]
    pub id: String,
    /// Dispatch key into the step handler registry.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Handler-specific inputs.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub inputs: Value,
    /// Unconditional successor(s); only the first element is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<StepNext>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Circuit breaker policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerPolicy>,
    /// Rate limiter policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
    /// Pre-flight budget charge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
    /// Predicate-driven branching (gate steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkSpec>,
}

impl Step {
    /// Create a bare step with the given id and type.
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            ..Self::default()
        }
    }

    /// Builder-style setter for `inputs`.
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Builder-style setter for `next`.
    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(StepNext::One(next.into()));
        self
    }

    /// The id when present, otherwise the step type.
    pub fn label(&self) -> &str {
        if self.id.is_empty() {
            &self.step_type
        } else {
            &self.id
        }
    }

    /// Inputs as a JSON object, when they are one.
    pub fn inputs_object(&self) -> Option<&Map<String, Value>> {
        self.inputs.as_object()
    }

    /// A single input field.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.as_object().and_then(|m| m.get(key))
    }

    /// Number of attempts allowed by the retry policy (at least 1).
    pub fn max_attempts(&self) -> u32 {
        self.retry.as_ref().map_or(1, |r| r.max.max(1))
    }

    /// Breaker key: explicit key, else the step id, else the step type.
    pub fn breaker_key(&self) -> String {
        self.breaker
            .as_ref()
            .and_then(|b| b.key.as_deref())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.label())
            .to_string()
    }

    /// Declared cost estimate (0 when absent).
    pub fn cost_estimate(&self) -> f64 {
        self.cost.as_ref().map_or(0.0, |c| c.estimate)
    }

    /// The unconditional successor id, if declared.
    pub fn next_id(&self) -> Option<&str> {
        self.next.as_ref().and_then(StepNext::first)
    }
}

/// Successor declaration: a single id or a sequence of ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepNext {
    One(String),
    Many(Vec<String>),
}

impl StepNext {
    /// First declared successor.
    pub fn first(&self) -> Option<&str> {
        match self {
            StepNext::One(id) => Some(id.as_str()),
            StepNext::Many(ids) => ids.first().map(String::as_str),
        }
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Retry configuration for a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 and 1 both mean a single attempt).
    #[serde(default)]
    pub max: u32,
    /// Delay schedule; attempt `n` waits `backoff_ms[min(n-1, len-1)]`.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
    /// Apply deterministic full jitter to each delay.
    #[serde(default)]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Base delay before the attempt following `attempt` (1-based).
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        if self.backoff_ms.is_empty() {
            return 0;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff_ms.len() - 1);
        self.backoff_ms[idx]
    }
}

/// Circuit breaker policy. Absent fields fall back to registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerPolicy {
    /// Shared breaker key; defaults to the step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_open_max: Option<u32>,
}

/// Fixed-window rate limit policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

impl RateLimitPolicy {
    /// The gate only applies when key, limit, and interval are all present.
    pub fn is_configured(&self) -> bool {
        self.key.as_deref().is_some_and(|k| !k.is_empty())
            && self.limit.is_some()
            && self.interval_ms.is_some()
    }
}

/// Pre-flight cost charged against the run budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    #[serde(default)]
    pub estimate: f64,
}

/// Predicate-driven branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkSpec {
    /// Predicate expression, e.g. `${score} >= 0.6`.
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_true: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_false: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
