//! Run context: the mutable data bag threaded through a run.
//!
//! The visible part is a JSON object addressed with dot-paths
//! (`user.address.city`, `items.0`). Alongside it sits a `RunScope` that is
//! never serialized: it carries the immutable run caps and a handle to the
//! executor so nested handlers (fan-out) can run sub-steps under the same
//! deadline, trace id, and shared breaker/limiter state.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::events::EventSink;
use crate::step_core::StepExecutor;
use crate::time::now_ms;

// ---------------------------------------------------------------------------
// RunCaps
// ---------------------------------------------------------------------------

/// Run-wide limits, computed once at run start.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCaps {
    /// Absolute deadline on the engine clock (`time::now_ms`).
    pub deadline_at_ms: Option<u64>,
    /// Cumulative cost ceiling.
    pub max_cost: Option<f64>,
    pub trace_id: String,
}

impl RunCaps {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            deadline_at_ms: None,
            max_cost: None,
            trace_id: trace_id.into(),
        }
    }

    /// Set the deadline to `max_duration_ms` from now.
    pub fn with_max_duration(mut self, max_duration_ms: Option<u64>) -> Self {
        self.deadline_at_ms = max_duration_ms.map(|ms| now_ms().saturating_add(ms));
        self
    }

    pub fn with_max_cost(mut self, max_cost: Option<f64>) -> Self {
        self.max_cost = max_cost;
        self
    }

    /// Milliseconds left before the deadline, `None` when there is none.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.deadline_at_ms.map(|at| at.saturating_sub(now_ms))
    }

    /// Whether the deadline exists and has passed.
    pub fn deadline_elapsed(&self, now_ms: u64) -> bool {
        self.remaining_ms(now_ms) == Some(0)
    }

    /// Whether charging `estimate` on top of `spent` would exceed the budget.
    pub fn exceeds_budget(&self, spent: f64, estimate: f64) -> bool {
        self.max_cost.is_some_and(|max| spent + estimate > max)
    }
}

// ---------------------------------------------------------------------------
// RunScope
// ---------------------------------------------------------------------------

/// Hidden side-channel available to handlers during a run.
#[derive(Clone)]
pub struct RunScope {
    pub caps: Arc<RunCaps>,
    pub executor: Arc<StepExecutor>,
    pub events: EventSink,
}

impl fmt::Debug for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunScope")
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Context owned by exactly one run (or one fan-out item).
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    values: Map<String, Value>,
    scope: Option<RunScope>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON value. Only objects contribute keys.
    pub fn from_value(input: Value) -> Self {
        let values = match input {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            values,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: RunScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn scope(&self) -> Option<&RunScope> {
        self.scope.as_ref()
    }

    pub fn caps(&self) -> Option<&RunCaps> {
        self.scope.as_ref().map(|s| s.caps.as_ref())
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.values
    }

    /// Resolve a dot-path. `None` means "undefined".
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_in_map(&self.values, path)
    }

    /// Write `value` at a dot-path, creating intermediate objects.
    pub fn set(&mut self, path: &str, value: Value) {
        set_in_map(&mut self.values, path, value);
    }

    /// Visible context as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

// ---------------------------------------------------------------------------
// Dot-path helpers
// ---------------------------------------------------------------------------

/// Resolve a dot-path inside a JSON value.
///
/// Objects are walked by key and arrays by numeric index. An empty path or
/// any missing segment yields `None`.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    match root {
        Value::Object(map) => get_in_map(map, path),
        _ => None,
    }
}

fn get_in_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut cur = map.get(first)?;
    for segment in segments {
        cur = match cur {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Write `value` at a dot-path, replacing non-object intermediates with
/// empty objects.
pub fn set_in_map(map: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut cur = map;
    for segment in parents {
        let slot = cur
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        cur = descend(slot);
    }
    cur.insert((*last).to_string(), value);
}

fn descend(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just replaced with an object"),
    }
}

// ---------------------------------------------------------------------------
// Loose numeric coercion
// ---------------------------------------------------------------------------

/// Numeric view of a context value, following the usual dynamic-language
/// rules: missing is NaN, null is 0, booleans are 0/1, strings are trimmed and
/// parsed (empty is 0, `0x` hex and `Infinity` accepted), anything else NaN.
pub fn loose_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_loose_str(s),
        Some(Value::Array(_) | Value::Object(_)) => f64::NAN,
    }
}

/// Parse a string the way a loose numeric cast does.
pub fn parse_loose_str(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    // Rust accepts "inf"/"nan" spellings that a loose cast rejects.
    if s.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
