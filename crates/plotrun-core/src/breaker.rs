//! Per-key circuit breaker registry.
//!
//! Each breaker moves between `Closed`, `Open`, and `HalfOpen`:
//!
//! - closed: every call passes; failures count toward `fail_threshold`.
//! - open: calls are refused until `cooldown_ms` has elapsed since opening,
//!   then the breaker goes half-open and lets that call through as a probe.
//! - half-open: up to `half_open_max` probe calls pass.
//!
//! A success from any state closes the breaker. Breakers are shared by every
//! run using the same registry and are never reset by a policy update.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use plotrun_types::plot::BreakerPolicy;
use plotrun_types::record::FailureReason;

const DEFAULT_FAIL_THRESHOLD: u32 = 3;
const DEFAULT_COOLDOWN_MS: u64 = 30_000;
const DEFAULT_HALF_OPEN_MAX: u32 = 1;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Normalized breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub fail_threshold: u32,
    pub cooldown_ms: u64,
    pub half_open_max: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            half_open_max: DEFAULT_HALF_OPEN_MAX,
        }
    }
}

impl BreakerSettings {
    /// Overwrite the fields the policy supplies, flooring each at 1.
    fn merge(&mut self, policy: &BreakerPolicy) {
        if let Some(v) = policy.fail_threshold {
            self.fail_threshold = v.max(1);
        }
        if let Some(v) = policy.cooldown_ms {
            self.cooldown_ms = v.max(1);
        }
        if let Some(v) = policy.half_open_max {
            self.half_open_max = v.max(1);
        }
    }
}

/// Mutable state of one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at_ms: u64,
    pub half_open_probes: u32,
    pub settings: BreakerSettings,
}

impl BreakerState {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at_ms: 0,
            half_open_probes: 0,
            settings,
        }
    }

    /// Decide whether a call may start at `now_ms`.
    pub fn can_pass(&mut self, now_ms: u64) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now_ms.saturating_sub(self.opened_at_ms) >= self.settings.cooldown_ms {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_probes = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_probes < self.settings.half_open_max {
                    self.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_probes = 0;
        self.opened_at_ms = 0;
    }

    /// Count a failure. Returns `true` when this call opened the breaker.
    pub fn on_failure(&mut self, reason: &FailureReason, now_ms: u64) -> bool {
        if !reason.counts_against_breaker() {
            return false;
        }
        self.failure_count += 1;
        if self.failure_count >= self.settings.fail_threshold {
            let was_open = self.state == CircuitState::Open;
            self.state = CircuitState::Open;
            self.opened_at_ms = now_ms;
            self.half_open_probes = 0;
            return !was_open;
        }
        false
    }
}

/// Shared handle to one key's breaker.
#[derive(Debug, Clone)]
pub struct Breaker {
    key: String,
    state: Arc<Mutex<BreakerState>>,
}

impl Breaker {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn can_pass(&self, now_ms: u64) -> bool {
        self.state
            .lock()
            .expect("breaker lock poisoned")
            .can_pass(now_ms)
    }

    pub fn on_success(&self) {
        self.state.lock().expect("breaker lock poisoned").on_success();
    }

    pub fn on_failure(&self, reason: &FailureReason, now_ms: u64) {
        let opened = self
            .state
            .lock()
            .expect("breaker lock poisoned")
            .on_failure(reason, now_ms);
        if opened {
            tracing::warn!(breaker = %self.key, reason = %reason, "circuit breaker opened");
        }
    }

    pub fn snapshot(&self) -> BreakerState {
        self.state.lock().expect("breaker lock poisoned").clone()
    }
}

/// Breakers keyed by string.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<Mutex<BreakerState>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up (or create) the breaker for `key`.
    ///
    /// When `policy` is given its supplied fields are merged into the stored
    /// settings; the circuit state itself is left untouched.
    pub fn breaker(&self, key: &str, policy: Option<&BreakerPolicy>) -> Breaker {
        let state = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerState::new(BreakerSettings::default()))))
            .clone();

        if let Some(policy) = policy {
            state
                .lock()
                .expect("breaker lock poisoned")
                .settings
                .merge(policy);
        }

        Breaker {
            key: key.to_string(),
            state,
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
