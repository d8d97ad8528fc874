//! Step execution core.
//!
//! Runs one step through the attempt loop:
//!
//! 1. breaker gate (a refusal ends the loop without consuming an attempt)
//! 2. rate-limit gate, when the step configures one
//! 3. handler invocation under `min(timeoutMs, time left before the deadline)`
//! 4. fixed backoff from `retry.backoffMs` between attempts, cut short at the
//!    run deadline
//!
//! The final failure is reported to the breaker once, after the loop.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use plotrun_types::event::RunEvent;
use plotrun_types::plot::Step;
use plotrun_types::record::FailureReason;

use crate::backoff::{BackoffStrategy, compute_delay};
use crate::breaker::BreakerRegistry;
use crate::context::{RunCaps, RunContext};
use crate::events::EventSink;
use crate::handler::registry::HandlerRegistry;
use crate::handler::{HandlerError, StepOutcome};
use crate::ratelimit::RateLimiterRegistry;
use crate::time::now_ms;

/// Result of running one step through the core.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepRunResult {
    pub ok: bool,
    /// Handler attempts started.
    pub attempts: u32,
    pub reason: Option<FailureReason>,
    /// Last handler error message.
    pub error: Option<String>,
    pub outcome: StepOutcome,
}

impl StepRunResult {
    fn rejected(reason: FailureReason, error: Option<String>) -> Self {
        Self {
            ok: false,
            attempts: 0,
            reason: Some(reason),
            error,
            outcome: StepOutcome::default(),
        }
    }
}

/// Why the most recent attempt did not succeed.
#[derive(Debug)]
enum LastFail {
    BreakerOpen,
    RateLimit,
    Timeout,
    Error(HandlerError),
}

impl LastFail {
    fn cause(&self) -> &'static str {
        match self {
            LastFail::BreakerOpen => "breaker-open",
            LastFail::RateLimit => "rate-limit",
            LastFail::Timeout => "timeout",
            LastFail::Error(_) => "error",
        }
    }

    fn into_reason(self) -> (FailureReason, Option<String>) {
        match self {
            LastFail::BreakerOpen => (FailureReason::BreakerOpen, None),
            LastFail::RateLimit => (FailureReason::RateLimit, None),
            LastFail::Timeout => (FailureReason::Timeout, Some("timeout".to_string())),
            LastFail::Error(HandlerError::Timeout) => {
                (FailureReason::Timeout, Some("timeout".to_string()))
            }
            LastFail::Error(HandlerError::BadInput(detail)) => {
                let message = format!("BAD_INPUT:{detail}");
                (FailureReason::BadInput(detail), Some(message))
            }
            LastFail::Error(HandlerError::Failed(message)) => {
                (FailureReason::RetryExhausted, Some(message))
            }
        }
    }
}

/// Owns the handler registry and the shared breaker and limiter state.
///
/// One executor is shared (behind `Arc`) by every run and fan-out worker of
/// an engine, so breakers and limiters see all traffic for their keys.
pub struct StepExecutor {
    handlers: HandlerRegistry,
    breakers: BreakerRegistry,
    limiters: RateLimiterRegistry,
}

impl StepExecutor {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self {
            handlers,
            breakers: BreakerRegistry::new(),
            limiters: RateLimiterRegistry::new(),
        }
    }

    pub fn with_builtins() -> Self {
        Self::new(HandlerRegistry::with_builtins())
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }

    /// Pre-flight check: the step type is known and its handler accepts the
    /// inputs. The error is the `BAD_INPUT` detail.
    pub fn preflight(&self, step: &Step) -> Result<(), String> {
        let handler = self
            .handlers
            .get(&step.step_type)
            .ok_or_else(|| format!("unknown step type: {}", step.step_type))?;
        handler.validate(step)
    }

    /// Run `step` against `ctx` under `caps`.
    pub async fn run_step(
        &self,
        ctx: &mut RunContext,
        step: &Step,
        caps: &RunCaps,
        events: &EventSink,
    ) -> StepRunResult {
        let label = step.label().to_string();
        let Some(handler) = self.handlers.get(&step.step_type) else {
            let detail = format!("unknown step type: {}", step.step_type);
            return StepRunResult::rejected(FailureReason::BadInput(detail.clone()), Some(detail));
        };

        let max_attempts = step.max_attempts();
        let breaker = self
            .breakers
            .breaker(&step.breaker_key(), step.breaker.as_ref());
        let limiter = step
            .rate_limit
            .as_ref()
            .filter(|rl| rl.is_configured())
            .map(|rl| {
                let limiter = self.limiters.limiter(rl.key.as_deref().unwrap_or_default());
                (limiter, rl)
            });

        let mut attempts = 0u32;
        let mut last_fail: Option<LastFail> = None;
        let mut outcome: Option<StepOutcome> = None;

        while attempts < max_attempts {
            if !breaker.can_pass(now_ms()) {
                tracing::debug!(step_id = %label, breaker = breaker.key(), "breaker refused attempt");
                last_fail = Some(LastFail::BreakerOpen);
                break;
            }

            attempts += 1;

            if let Some((limiter, policy)) = &limiter {
                limiter.configure(policy.limit, policy.interval_ms);
                if !limiter.acquire(now_ms()) {
                    let fail = LastFail::RateLimit;
                    if attempts < max_attempts {
                        self.back_off(step, caps, events, &label, attempts, &fail).await;
                        last_fail = Some(fail);
                        continue;
                    }
                    last_fail = Some(fail);
                    break;
                }
            }

            tracing::debug!(step_id = %label, attempt = attempts, max_attempts, "invoking handler");
            match self.invoke(handler.execute_boxed(ctx, step), step, caps).await {
                Ok(done) => {
                    breaker.on_success();
                    outcome = Some(done);
                    break;
                }
                Err(fail) => {
                    let retryable = !matches!(fail, LastFail::Error(HandlerError::BadInput(_)));
                    if retryable && attempts < max_attempts {
                        self.back_off(step, caps, events, &label, attempts, &fail).await;
                        last_fail = Some(fail);
                        continue;
                    }
                    last_fail = Some(fail);
                    break;
                }
            }
        }

        if let Some(outcome) = outcome {
            return StepRunResult {
                ok: true,
                attempts,
                reason: None,
                error: None,
                outcome,
            };
        }

        let (reason, error) = last_fail
            .map(LastFail::into_reason)
            .unwrap_or((FailureReason::RetryExhausted, None));
        breaker.on_failure(&reason, now_ms());
        tracing::debug!(step_id = %label, attempts, reason = %reason, "step failed");

        StepRunResult {
            ok: false,
            attempts,
            reason: Some(reason),
            error,
            outcome: StepOutcome::default(),
        }
    }

    /// Await one handler attempt under the effective timeout.
    async fn invoke<F>(&self, attempt: F, step: &Step, caps: &RunCaps) -> Result<StepOutcome, LastFail>
    where
        F: Future<Output = Result<StepOutcome, HandlerError>>,
    {
        let step_timeout = step.timeout_ms.filter(|ms| *ms > 0);
        let effective = match caps.remaining_ms(now_ms()) {
            Some(remaining) => Some(step_timeout.map_or(remaining, |t| t.min(remaining))),
            None => step_timeout,
        };

        let guarded = AssertUnwindSafe(attempt).catch_unwind();
        let settled = match effective {
            Some(0) => return Err(LastFail::Timeout),
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), guarded).await {
                Ok(settled) => settled,
                Err(_) => return Err(LastFail::Timeout),
            },
            None => guarded.await,
        };

        match settled {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(HandlerError::Timeout)) => Err(LastFail::Timeout),
            Ok(Err(err)) => Err(LastFail::Error(err)),
            Err(panic) => Err(LastFail::Error(HandlerError::Failed(panic_message(panic)))),
        }
    }

    async fn back_off(
        &self,
        step: &Step,
        caps: &RunCaps,
        events: &EventSink,
        label: &str,
        attempt: u32,
        fail: &LastFail,
    ) {
        let retry = step.retry.as_ref();
        let base = retry.map_or(0, |r| r.base_delay_ms(attempt));
        let jitter = retry.is_some_and(|r| r.jitter);
        let attempt_str = attempt.to_string();
        let delay_ms = compute_delay(
            BackoffStrategy::Fixed,
            base,
            base,
            jitter,
            attempt,
            &[caps.trace_id.as_str(), label, attempt_str.as_str()],
        );

        tracing::warn!(
            step_id = %label,
            attempt,
            cause = fail.cause(),
            delay_ms,
            "retrying step"
        );
        events.emit(&RunEvent::Retry {
            id: label.to_string(),
            attempt,
            cause: fail.cause().to_string(),
            delay_ms,
        });

        // Never sleep past the run deadline.
        let sleep_ms = caps
            .remaining_ms(now_ms())
            .map_or(delay_ms, |remaining| delay_ms.min(remaining));
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("handlers", &self.handlers.list_names())
            .field("breakers", &self.breakers.len())
            .field("limiters", &self.limiters.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::StepHandler;
    use plotrun_types::plot::{BreakerPolicy, RateLimitPolicy, RetryPolicy};
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `until` times, then succeeds.
    struct Flaky {
        calls: AtomicU32,
        until: u32,
    }

    impl StepHandler for Flaky {
        async fn execute(&self, _: &mut RunContext, _: &Step) -> Result<StepOutcome, HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.until {
                Err(HandlerError::failed("fail"))
            } else {
                Ok(StepOutcome::default())
            }
        }
    }

    struct Sleepy(u64);

    impl StepHandler for Sleepy {
        async fn execute(&self, _: &mut RunContext, _: &Step) -> Result<StepOutcome, HandlerError> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(StepOutcome::default())
        }
    }

    struct Panics;

    impl StepHandler for Panics {
        async fn execute(&self, _: &mut RunContext, _: &Step) -> Result<StepOutcome, HandlerError> {
            panic!("kaboom")
        }
    }

    struct BadInput(AtomicU32);

    impl StepHandler for BadInput {
        async fn execute(&self, _: &mut RunContext, _: &Step) -> Result<StepOutcome, HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::bad_input("x: required"))
        }
    }

    fn executor_with<H: StepHandler + 'static>(name: &str, handler: H) -> StepExecutor {
        let mut registry = HandlerRegistry::new();
        registry.register(name, handler);
        StepExecutor::new(registry)
    }

    fn retry(max: u32) -> Option<RetryPolicy> {
        Some(RetryPolicy {
            max,
            backoff_ms: vec![0],
            jitter: false,
        })
    }

    #[tokio::test]
    async fn retries_until_success() {
        let exec = executor_with("flaky", Flaky { calls: AtomicU32::new(0), until: 2 });
        let mut step = Step::new("x", "flaky");
        step.retry = retry(5);

        let res = exec
            .run_step(&mut RunContext::new(), &step, &RunCaps::new("t"), &EventSink::default())
            .await;
        assert!(res.ok);
        assert_eq!(res.attempts, 3);
        assert_eq!(res.reason, None);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_error() {
        let exec = executor_with("flaky", Flaky { calls: AtomicU32::new(0), until: 10 });
        let mut step = Step::new("x", "flaky");
        step.retry = retry(3);

        let retries = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&retries);
        let events = EventSink::new(
            Some(Arc::new(move |e: &RunEvent| {
                if let RunEvent::Retry { attempt, cause, .. } = e {
                    seen.lock().unwrap().push((*attempt, cause.clone()));
                }
            })),
            None,
        );

        let res = exec
            .run_step(&mut RunContext::new(), &step, &RunCaps::new("t"), &events)
            .await;
        assert!(!res.ok);
        assert_eq!(res.attempts, 3);
        assert_eq!(res.reason, Some(FailureReason::RetryExhausted));
        assert_eq!(res.error.as_deref(), Some("fail"));
        assert_eq!(
            *retries.lock().unwrap(),
            vec![(1, "error".to_string()), (2, "error".to_string())]
        );
    }

    /// Run `step` once and collect `(attempt, delay_ms)` from its retry events.
    async fn retry_delays(exec: &StepExecutor, step: &Step, caps: &RunCaps) -> Vec<(u32, u64)> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let events = EventSink::new(
            Some(Arc::new(move |e: &RunEvent| {
                if let RunEvent::Retry { attempt, delay_ms, .. } = e {
                    sink.lock().unwrap().push((*attempt, *delay_ms));
                }
            })),
            None,
        );
        exec.run_step(&mut RunContext::new(), step, caps, &events).await;
        seen.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn jittered_delays_are_seeded_by_trace_step_and_attempt() {
        let exec = executor_with("flaky", Flaky { calls: AtomicU32::new(0), until: 100 });
        let mut step = Step::new("fetch", "flaky");
        step.retry = Some(RetryPolicy {
            max: 3,
            backoff_ms: vec![100, 1000],
            jitter: true,
        });

        let delays = retry_delays(&exec, &step, &RunCaps::new("trace-1")).await;
        let expected: Vec<(u32, u64)> = [(1u32, 100u64), (2, 1000)]
            .into_iter()
            .map(|(n, base)| {
                let n_str = n.to_string();
                let delay = compute_delay(
                    BackoffStrategy::Fixed,
                    base,
                    base,
                    true,
                    n,
                    &["trace-1", "fetch", n_str.as_str()],
                );
                (n, delay)
            })
            .collect();
        assert_eq!(delays, expected);
        assert_eq!(delays, vec![(1, 20), (2, 947)]);
    }

    #[tokio::test]
    async fn unjittered_delays_follow_clamped_schedule() {
        let exec = executor_with("flaky", Flaky { calls: AtomicU32::new(0), until: 100 });
        let mut step = Step::new("x", "flaky");
        step.retry = Some(RetryPolicy {
            max: 4,
            backoff_ms: vec![1, 3],
            jitter: false,
        });

        let delays = retry_delays(&exec, &step, &RunCaps::new("t")).await;
        assert_eq!(delays, vec![(1, 1), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn backoff_sleep_stops_at_run_deadline() {
        let exec = executor_with("flaky", Flaky { calls: AtomicU32::new(0), until: 100 });
        let mut step = Step::new("x", "flaky");
        step.retry = Some(RetryPolicy {
            max: 3,
            backoff_ms: vec![500],
            jitter: false,
        });
        let caps = RunCaps::new("t").with_max_duration(Some(30));

        let started = std::time::Instant::now();
        let delays = retry_delays(&exec, &step, &caps).await;
        assert_eq!(delays.len(), 2);
        assert!(
            started.elapsed() < Duration::from_millis(400),
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn step_timeout_is_reported() {
        let exec = executor_with("sleepy", Sleepy(200));
        let mut step = Step::new("s", "sleepy");
        step.timeout_ms = Some(10);

        let res = exec
            .run_step(&mut RunContext::new(), &step, &RunCaps::new("t"), &EventSink::default())
            .await;
        assert!(!res.ok);
        assert_eq!(res.attempts, 1);
        assert_eq!(res.reason, Some(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn elapsed_deadline_times_out_immediately() {
        let exec = executor_with("sleepy", Sleepy(0));
        let step = Step::new("s", "sleepy");
        let caps = RunCaps {
            deadline_at_ms: Some(0),
            max_cost: None,
            trace_id: "t".to_string(),
        };
        let res = exec
            .run_step(&mut RunContext::new(), &step, &caps, &EventSink::default())
            .await;
        assert_eq!(res.reason, Some(FailureReason::Timeout));
        assert_eq!(res.attempts, 1);
    }

    #[tokio::test]
    async fn bad_input_is_not_retried() {
        let exec = executor_with("bad", BadInput(AtomicU32::new(0)));
        let mut step = Step::new("b", "bad");
        step.retry = retry(4);

        let res = exec
            .run_step(&mut RunContext::new(), &step, &RunCaps::new("t"), &EventSink::default())
            .await;
        assert_eq!(res.attempts, 1);
        assert_eq!(res.reason, Some(FailureReason::BadInput("x: required".to_string())));
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let exec = executor_with("panics", Panics);
        let res = exec
            .run_step(
                &mut RunContext::new(),
                &Step::new("p", "panics"),
                &RunCaps::new("t"),
                &EventSink::default(),
            )
            .await;
        assert!(!res.ok);
        assert_eq!(res.reason, Some(FailureReason::RetryExhausted));
        assert!(res.error.unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn open_breaker_stops_without_consuming_attempt() {
        let exec = executor_with("flaky", Flaky { calls: AtomicU32::new(0), until: 100 });
        let mut step = Step::new("x", "flaky");
        step.retry = retry(1);
        step.breaker = Some(BreakerPolicy {
            key: Some("shared".to_string()),
            fail_threshold: Some(1),
            cooldown_ms: Some(60_000),
            half_open_max: Some(1),
        });

        let caps = RunCaps::new("t");
        let first = exec
            .run_step(&mut RunContext::new(), &step, &caps, &EventSink::default())
            .await;
        assert_eq!(first.reason, Some(FailureReason::RetryExhausted));

        let second = exec
            .run_step(&mut RunContext::new(), &step, &caps, &EventSink::default())
            .await;
        assert_eq!(second.attempts, 0);
        assert_eq!(second.reason, Some(FailureReason::BreakerOpen));
    }

    #[tokio::test]
    async fn rate_limit_denies_remaining_attempts() {
        let exec = executor_with("sleepy", Sleepy(0));
        let mut step = Step::new("r", "sleepy");
        step.retry = retry(2);
        step.rate_limit = Some(RateLimitPolicy {
            key: Some("rl".to_string()),
            limit: Some(1),
            interval_ms: Some(60_000),
        });
        let caps = RunCaps::new("t");

        let first = exec
            .run_step(&mut RunContext::new(), &step, &caps, &EventSink::default())
            .await;
        assert!(first.ok);

        let second = exec
            .run_step(&mut RunContext::new(), &step, &caps, &EventSink::default())
            .await;
        assert!(!second.ok);
        assert_eq!(second.attempts, 2);
        assert_eq!(second.reason, Some(FailureReason::RateLimit));
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let exec = StepExecutor::new(HandlerRegistry::new());
        let step = Step::new("u", "nope");
        assert_eq!(exec.preflight(&step), Err("unknown step type: nope".to_string()));
        let res = exec
            .run_step(&mut RunContext::new(), &step, &RunCaps::new("t"), &EventSink::default())
            .await;
        assert_eq!(res.attempts, 0);
        assert!(matches!(res.reason, Some(FailureReason::BadInput(_))));
    }
}
