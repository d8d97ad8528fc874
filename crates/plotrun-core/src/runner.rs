//! Plot runner: walks a plot from its entry step to completion.
//!
//! A run is sequential. Before each step the runner checks the run deadline,
//! the cost budget, and the step's inputs; any of those failing records the
//! step with 0 attempts and ends the run. Otherwise the step goes through the
//! [`StepExecutor`] and the runner follows the chosen successor. The first
//! failed step ends the run; step failures are reported in the record, never
//! as an `Err`.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use plotrun_types::config::EngineConfig;
use plotrun_types::event::RunEvent;
use plotrun_types::plot::{Plot, Step};
use plotrun_types::record::{FailureReason, RunRecord, RunStats, StepRecord, StepStatus};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::context::{RunCaps, RunContext, RunScope};
use crate::definition::{PlotError, validate_plot};
use crate::events::{EventObserver, EventSink};
use crate::metrics::{DurationSamples, MetricsSnapshot};
use crate::step_core::{StepExecutor, StepRunResult};
use crate::time::now_ms;
use crate::trace::TraceWriter;

// ---------------------------------------------------------------------------
// Options and output
// ---------------------------------------------------------------------------

/// Per-run options.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Initial context. Only a JSON object contributes keys.
    pub input: Value,
    pub observer: Option<EventObserver>,
    /// Defaults to a fresh UUID v7.
    pub trace_id: Option<String>,
    /// Overrides the runner's default deadline.
    pub max_duration_ms: Option<u64>,
    pub max_cost: Option<f64>,
}

impl RunOptions {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_max_duration_ms(mut self, max_duration_ms: u64) -> Self {
        self.max_duration_ms = Some(max_duration_ms);
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("input", &self.input)
            .field("observer", &self.observer.is_some())
            .field("trace_id", &self.trace_id)
            .field("max_duration_ms", &self.max_duration_ms)
            .field("max_cost", &self.max_cost)
            .finish()
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub record: RunRecord,
    pub stats: RunStats,
    /// Final visible context.
    pub ctx: Value,
}

impl RunOutput {
    /// Whether every executed step ended ok.
    pub fn succeeded(&self) -> bool {
        self.stats.failed == 0
    }
}

// ---------------------------------------------------------------------------
// PlotRunner
// ---------------------------------------------------------------------------

/// Executes plots against a shared [`StepExecutor`].
///
/// Runs started from the same runner share breakers, rate limiters, the
/// trace sink, and the duration samples.
pub struct PlotRunner {
    executor: Arc<StepExecutor>,
    default_max_duration_ms: Option<u64>,
    trace: Option<Arc<TraceWriter>>,
    metrics: Mutex<DurationSamples>,
}

impl PlotRunner {
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        Self {
            executor,
            default_max_duration_ms: None,
            trace: None,
            metrics: Mutex::new(DurationSamples::default()),
        }
    }

    /// Runner over the built-in handlers with default settings.
    pub fn with_builtins() -> Self {
        Self::new(Arc::new(StepExecutor::with_builtins()))
    }

    /// Apply an engine config. A trace file that cannot be created is logged
    /// and the runner continues without one.
    pub fn from_config(executor: Arc<StepExecutor>, config: &EngineConfig) -> Self {
        let trace = if config.trace.enabled {
            match TraceWriter::create_in(&config.trace.dir) {
                Ok(writer) => {
                    tracing::info!(path = %writer.path().display(), "trace sink enabled");
                    Some(Arc::new(writer))
                }
                Err(e) => {
                    tracing::warn!(
                        dir = %config.trace.dir.display(),
                        error = %e,
                        "failed to create trace file, tracing disabled"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            executor,
            default_max_duration_ms: config.default_max_duration_ms,
            trace,
            metrics: Mutex::new(DurationSamples::new(config.metrics_window)),
        }
    }

    pub fn with_trace_writer(mut self, trace: Arc<TraceWriter>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_default_max_duration_ms(mut self, max_duration_ms: Option<u64>) -> Self {
        self.default_max_duration_ms = max_duration_ms;
        self
    }

    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    pub fn trace_writer(&self) -> Option<&Arc<TraceWriter>> {
        self.trace.as_ref()
    }

    /// Duration statistics over recent steps of every run.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .snapshot()
    }

    /// Execute `plot` to completion.
    ///
    /// Returns `Err` only for a structurally invalid plot.
    pub async fn run(&self, plot: &Plot, options: RunOptions) -> Result<RunOutput, PlotError> {
        validate_plot(plot)?;

        let trace_id = options
            .trace_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let run_start = now_ms();
        let caps = Arc::new(
            RunCaps::new(trace_id.clone())
                .with_max_duration(options.max_duration_ms.or(self.default_max_duration_ms))
                .with_max_cost(options.max_cost),
        );
        let events = EventSink::new(options.observer, self.trace.clone());
        let scope = RunScope {
            caps: Arc::clone(&caps),
            executor: Arc::clone(&self.executor),
            events: events.clone(),
        };
        let mut ctx = RunContext::from_value(options.input).with_scope(scope);
        let mut record = RunRecord::new(plot.id.clone(), trace_id.clone());
        let mut stats = RunStats::default();

        tracing::info!(
            plot = plot.id.as_str(),
            trace_id = trace_id.as_str(),
            steps = plot.steps.len(),
            "starting plot run"
        );

        let mut cursor = plot.entry();
        while let Some(step) = cursor {
            let (step_record, result) = self.run_one(step, &mut ctx, &caps, &events, &stats).await;
            stats.observe(&step_record, step.cost_estimate());
            let label = step_record.id.clone();
            let step_type = step_record.step_type.clone();
            let duration_ms = step_record.duration_ms;
            let attempts = step_record.attempts;
            record.steps.push(step_record);

            if !result.ok {
                let reason = result.reason.unwrap_or(FailureReason::RetryExhausted);
                tracing::warn!(
                    step_id = %label,
                    attempts,
                    reason = %reason,
                    "step failed, ending run"
                );
                events.emit(&RunEvent::StepFail {
                    id: label,
                    step_type,
                    duration_ms,
                    attempts,
                    reason,
                    error: result.error,
                });
                break;
            }

            let next_id = result
                .outcome
                .next_id
                .clone()
                .or_else(|| step.next_id().map(str::to_string));
            if result.outcome.fork_used {
                events.emit(&RunEvent::Fork {
                    from: label.clone(),
                    next_id: next_id.clone(),
                });
            }
            events.emit(&RunEvent::StepOk {
                id: label.clone(),
                step_type,
                duration_ms,
                attempts,
            });

            cursor = match next_id {
                None => None,
                Some(id) => {
                    let next = plot.step(&id);
                    if next.is_none() {
                        tracing::warn!(
                            step_id = %label,
                            next_id = %id,
                            "successor not found in plot, ending run"
                        );
                    }
                    next
                }
            };
        }

        stats.total_ms = now_ms().saturating_sub(run_start);
        record.finished_at = Some(Utc::now());
        let ctx = ctx.into_value();
        record.final_state.ctx = ctx.clone();
        events.emit(&RunEvent::Done {
            total_ms: stats.total_ms,
        });

        tracing::info!(
            plot = plot.id.as_str(),
            trace_id = trace_id.as_str(),
            steps = stats.steps,
            ok = stats.ok,
            failed = stats.failed,
            retries = stats.retries,
            total_ms = stats.total_ms,
            "plot run finished"
        );

        Ok(RunOutput { record, stats, ctx })
    }

    /// Pre-checks plus the execution core for one step.
    async fn run_one(
        &self,
        step: &Step,
        ctx: &mut RunContext,
        caps: &RunCaps,
        events: &EventSink,
        stats: &RunStats,
    ) -> (StepRecord, StepRunResult) {
        let label = step.label().to_string();
        events.emit(&RunEvent::StepStart {
            id: label.clone(),
            step_type: step.step_type.clone(),
        });

        let started = now_ms();
        let result = if caps.deadline_elapsed(started) {
            rejected(FailureReason::Timeout, "timeout".to_string())
        } else if caps.exceeds_budget(stats.cost, step.cost_estimate()) {
            rejected(FailureReason::BudgetExceeded, "budget-exceeded".to_string())
        } else if let Err(detail) = self.executor.preflight(step) {
            let message = format!("BAD_INPUT:{detail}");
            rejected(FailureReason::BadInput(detail), message)
        } else {
            self.executor.run_step(ctx, step, caps, events).await
        };
        let duration_ms = now_ms().saturating_sub(started);

        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .record(duration_ms);

        let record = StepRecord {
            id: label,
            step_type: step.step_type.clone(),
            status: if result.ok { StepStatus::Ok } else { StepStatus::Fail },
            duration_ms,
            attempts: result.attempts,
            reason: result.reason.clone(),
            error: result.error.clone(),
        };
        (record, result)
    }
}

fn rejected(reason: FailureReason, error: String) -> StepRunResult {
    StepRunResult {
        ok: false,
        attempts: 0,
        reason: Some(reason),
        error: Some(error),
        ..StepRunResult::default()
    }
}

impl std::fmt::Debug for PlotRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotRunner")
            .field("executor", &self.executor)
            .field("default_max_duration_ms", &self.default_max_duration_ms)
            .field("trace", &self.trace.as_ref().map(|t| t.path().to_path_buf()))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
