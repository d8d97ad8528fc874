//! Step-based workflow execution engine.
//!
//! Given a declarative `Plot`, the engine executes its steps one at a time,
//! applying per-step timeout, retry with backoff, circuit breaking, and rate
//! limiting, plus run-wide deadline and cost-budget enforcement. A fan-out
//! step runs a sub-sequence of steps once per collection item under a
//! bounded worker pool, reusing the same step execution core.
//!
//! - `backoff` -- deterministic retry delay calculator
//! - `ratelimit` -- fixed-window limiter registry
//! - `breaker` -- per-key circuit breaker registry
//! - `predicate` -- `${path} OP literal` compiler with cache
//! - `context` -- run context with dot-path access and run caps
//! - `handler` -- step handler contract, registry, and built-ins
//! - `step_core` -- attempt/backoff/breaker/rate-limit/timeout loop
//! - `runner` -- plot orchestrator
//! - `events`, `trace`, `metrics` -- observers
//! - `definition`, `config` -- plot document and config loading

pub mod backoff;
pub mod breaker;
pub mod config;
pub mod context;
pub mod definition;
pub mod events;
pub mod handler;
pub mod metrics;
pub mod predicate;
pub mod ratelimit;
pub mod runner;
pub mod step_core;
pub mod time;
pub mod trace;

pub use context::{RunCaps, RunContext};
pub use handler::registry::HandlerRegistry;
pub use runner::{PlotRunner, RunOptions, RunOutput};
pub use step_core::StepExecutor;
