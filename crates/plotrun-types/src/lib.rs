//! Shared domain types for plotrun.
//!
//! This crate contains the declarative plot model, the run record and
//! statistics returned by the engine, lifecycle events, and engine
//! configuration.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, chrono, thiserror.

pub mod config;
pub mod event;
pub mod plot;
pub mod record;
