//! Monotonic millisecond clock shared by the engine.
//!
//! Breakers, limiters, and run deadlines all compare timestamps taken from
//! this clock. It starts at the first call in the process and never goes
//! backwards.

use std::sync::OnceLock;
use std::time::Instant;

static ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the process-wide clock origin.
pub fn now_ms() -> u64 {
    ORIGIN.get_or_init(Instant::now).elapsed().as_millis() as u64
}
