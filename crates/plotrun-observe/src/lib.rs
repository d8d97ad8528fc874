//! Observability setup for plotrun binaries.
//!
//! - `tracing_setup` -- subscriber with env-filtered fmt output and an
//!   optional OpenTelemetry span bridge

pub mod tracing_setup;
