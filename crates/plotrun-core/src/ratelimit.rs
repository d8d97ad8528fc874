//! Fixed-window rate limiter registry.
//!
//! Limiters are created on first reference and live as long as the registry.
//! Every run and fan-out worker that shares a `StepExecutor` shares its
//! limiters, so each key's counter sits behind its own lock.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

/// Counter state for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedWindow {
    pub limit: u32,
    pub interval_ms: u64,
    /// Set on the first `acquire`.
    pub window_start_ms: Option<u64>,
    pub count: u32,
}

impl FixedWindow {
    /// Overwrite only the supplied fields.
    pub fn configure(&mut self, limit: Option<u32>, interval_ms: Option<u64>) {
        if let Some(limit) = limit {
            self.limit = limit;
        }
        if let Some(interval_ms) = interval_ms {
            self.interval_ms = interval_ms;
        }
    }

    /// Try to take one slot in the current window.
    pub fn acquire(&mut self, now_ms: u64) -> bool {
        let start = *self.window_start_ms.get_or_insert(now_ms);
        if self.interval_ms > 0 && now_ms.saturating_sub(start) >= self.interval_ms {
            self.window_start_ms = Some(now_ms);
            self.count = 0;
        }

        if self.limit == 0 {
            return false;
        }
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

/// Shared handle to one key's limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    key: String,
    state: Arc<Mutex<FixedWindow>>,
}

impl RateLimiter {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn configure(&self, limit: Option<u32>, interval_ms: Option<u64>) {
        self.state
            .lock()
            .expect("rate limiter lock poisoned")
            .configure(limit, interval_ms);
    }

    pub fn acquire(&self, now_ms: u64) -> bool {
        self.state
            .lock()
            .expect("rate limiter lock poisoned")
            .acquire(now_ms)
    }

    /// Copy of the current counter state.
    pub fn snapshot(&self) -> FixedWindow {
        self.state.lock().expect("rate limiter lock poisoned").clone()
    }
}

/// Limiters keyed by string.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<String, Arc<Mutex<FixedWindow>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the limiter for `key`, creating an unconfigured one if needed.
    pub fn limiter(&self, key: &str) -> RateLimiter {
        let state = self
            .limiters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(FixedWindow::default())))
            .clone();
        RateLimiter {
            key: key.to_string(),
            state,
        }
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let registry = RateLimiterRegistry::new();
        let limiter = registry.limiter("api");
        limiter.configure(Some(2), Some(1000));

        assert!(limiter.acquire(0));
        assert!(limiter.acquire(10));
        assert!(!limiter.acquire(20));
    }

    #[test]
    fn window_resets_after_interval() {
        let registry = RateLimiterRegistry::new();
        let limiter = registry.limiter("api");
        limiter.configure(Some(1), Some(100));

        assert!(limiter.acquire(500));
        assert!(!limiter.acquire(599));
        assert!(limiter.acquire(600));
        assert_eq!(limiter.snapshot().window_start_ms, Some(600));
    }

    #[test]
    fn zero_limit_always_denies() {
        let registry = RateLimiterRegistry::new();
        let limiter = registry.limiter("closed");
        limiter.configure(Some(0), Some(10));
        assert!(!limiter.acquire(0));
        assert!(!limiter.acquire(1000));
    }

    #[test]
    fn zero_interval_never_resets() {
        let registry = RateLimiterRegistry::new();
        let limiter = registry.limiter("once");
        limiter.configure(Some(1), Some(0));
        assert!(limiter.acquire(0));
        assert!(!limiter.acquire(1_000_000));
    }

    #[test]
    fn configure_keeps_unsupplied_fields() {
        let registry = RateLimiterRegistry::new();
        let limiter = registry.limiter("k");
        limiter.configure(Some(5), Some(250));
        limiter.configure(None, Some(500));
        let state = limiter.snapshot();
        assert_eq!(state.limit, 5);
        assert_eq!(state.interval_ms, 500);
    }

    #[test]
    fn same_key_shares_state() {
        let registry = RateLimiterRegistry::new();
        registry.limiter("shared").configure(Some(1), Some(1000));
        assert!(registry.limiter("shared").acquire(0));
        assert!(!registry.limiter("shared").acquire(1));
        assert_eq!(registry.len(), 1);
    }
}
