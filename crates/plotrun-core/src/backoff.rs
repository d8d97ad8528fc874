//! Deterministic retry delay calculator.
//!
//! Delays are a pure function of the strategy, the attempt number, and the
//! seed parts. Jitter is derived from the seed instead of a random source so
//! that a replayed run waits exactly as long as the recorded run did.

/// How the base delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Always `base_ms`.
    Fixed,
    /// `base_ms * 2^(attempt-1)`, capped by `max_ms` when it is non-zero.
    Exponential,
}

/// Compute the delay before the next attempt.
///
/// `attempt` is 1-based (values below 1 are treated as 1). With `jitter`,
/// the delay is scaled by a factor in `[0, 1]` derived from `seed_parts`.
pub fn compute_delay<S: AsRef<str>>(
    strategy: BackoffStrategy,
    base_ms: u64,
    max_ms: u64,
    jitter: bool,
    attempt: u32,
    seed_parts: &[S],
) -> u64 {
    let attempt = attempt.max(1);
    let delay = match strategy {
        BackoffStrategy::Fixed => base_ms,
        BackoffStrategy::Exponential => {
            let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
            let raw = base_ms.saturating_mul(factor);
            if max_ms > 0 { raw.min(max_ms) } else { raw }
        }
    };

    if jitter {
        let frac = seeded_unit(seed_from(seed_parts));
        (delay as f64 * frac).floor() as u64
    } else {
        delay
    }
}

/// 32-bit FNV-1a over the UTF-16 code units of the `|`-joined seed parts.
fn seed_from<S: AsRef<str>>(parts: &[S]) -> u32 {
    let joined = parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join("|");

    let mut h: u32 = 2_166_136_261;
    for unit in joined.encode_utf16() {
        h ^= u32::from(unit);
        h = h.wrapping_mul(16_777_619);
    }
    h
}

/// One xorshift32 round normalized by `u32::MAX`.
///
/// The middle shift is arithmetic (sign-propagating) to stay bit-compatible
/// with existing delay fixtures.
fn seeded_unit(seed: u32) -> f64 {
    let mut x = if seed == 0 { 1 } else { seed };
    x ^= x << 13;
    x ^= ((x as i32) >> 17) as u32;
    x ^= x << 5;
    f64::from(x) / f64::from(u32::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NO_SEED: [&str; 0] = [];

    #[test]
    fn fixed_ignores_attempt() {
        assert_eq!(compute_delay(BackoffStrategy::Fixed, 100, 0, false, 1, &["a", "b", "1"]), 100);
        assert_eq!(compute_delay(BackoffStrategy::Fixed, 100, 0, false, 2, &["a", "b", "2"]), 100);
    }

    #[test]
    fn exponential_grows_and_caps() {
        let d = |attempt| compute_delay(BackoffStrategy::Exponential, 50, 400, false, attempt, &["x"]);
        assert_eq!(d(1), 50);
        assert_eq!(d(2), 100);
        assert_eq!(d(3), 200);
        assert_eq!(d(4), 400);
        assert_eq!(d(5), 400);
        assert_eq!(d(64), 400);
        for attempt in 1..20 {
            assert!(d(attempt) <= 400);
        }
    }

    #[test]
    fn exponential_without_cap_is_raw() {
        assert_eq!(compute_delay(BackoffStrategy::Exponential, 10, 0, false, 4, &NO_SEED), 80);
    }

    #[test]
    fn max_never_inflates_smaller_value() {
        assert_eq!(compute_delay(BackoffStrategy::Exponential, 10, 1000, false, 1, &NO_SEED), 10);
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        assert_eq!(compute_delay(BackoffStrategy::Exponential, 50, 400, false, 0, &NO_SEED), 50);
    }

    #[test]
    fn jitter_is_deterministic() {
        let a = compute_delay(BackoffStrategy::Fixed, 100, 0, true, 1, &["seed", "1"]);
        let b = compute_delay(BackoffStrategy::Fixed, 100, 0, true, 1, &["seed", "1"]);
        assert_eq!(a, b);
        assert!(a <= 100);
    }

    #[test]
    fn jitter_matches_fixture_values() {
        let d = |base, parts: &[&str]| compute_delay(BackoffStrategy::Fixed, base, 0, true, 1, parts);
        assert_eq!(d(100, &["seed", "1"]), 50);
        assert_eq!(d(1000, &["seed", "1"]), 500);
        assert_eq!(d(100, &["trace-1", "fetch", "1"]), 20);
        assert_eq!(d(1000, &["trace-1", "fetch", "1"]), 209);
        assert_eq!(d(100, &["trace-1", "fetch", "2"]), 94);
        assert_eq!(d(1000, &["trace-1", "fetch", "2"]), 947);
        assert_eq!(d(100, &["fanout", "s", "3"]), 60);
    }

    #[test]
    fn jitter_of_zero_delay_is_zero() {
        assert_eq!(compute_delay(BackoffStrategy::Fixed, 0, 0, true, 3, &["t", "s", "3"]), 0);
    }
}
