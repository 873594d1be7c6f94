//! RateLimiter (C3, §4.3): per-principal sliding-window limiters for
//! messages and chat. Grounded on `backend-rust/src/middleware/rate_limit.rs`'s
//! `Arc<RwLock<HashMap<String, Entry>>>` shape, generalized from per-IP
//! login attempts to per-principal message/chat counters with a reclaim
//! sweep rather than a lockout window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Window {
    count: u32,
    window_start: Instant,
    last_event: Instant,
}

impl Window {
    fn fresh() -> Self {
        let now = Instant::now();
        Window {
            count: 0,
            window_start: now,
            last_event: now,
        }
    }
}

/// One sliding window per key (principal for messages, "room:principal"
/// for chat). `limit` messages are allowed per `period`; state older than
/// 60s past its last event is reclaimed by `sweep` (§4.3).
pub struct RateLimiter {
    limit: u32,
    period: Duration,
    windows: Arc<RwLock<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        RateLimiter {
            limit,
            period,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns `true` if the event is admitted under the limit; advances
    /// application state only on `true` (§4.3: excess messages "do not
    /// advance application state").
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let entry = windows.entry(key.to_string()).or_insert_with(Window::fresh);

        if now.duration_since(entry.window_start) >= self.period {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.last_event = now;
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drops entries whose last event is more than 60s old. Intended to be
    /// called periodically from a sweep task; reclaim latency is bounded
    /// by the caller's tick interval.
    pub async fn sweep(&self) {
        let cutoff = Instant::now() - Duration::from_secs(60);
        let mut windows = self.windows.write().await;
        windows.retain(|_, w| w.last_event > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("wallet-a").await);
        assert!(limiter.check("wallet-a").await);
        assert!(!limiter.check("wallet-a").await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("wallet-a").await);
        assert!(limiter.check("wallet-b").await);
    }

    #[tokio::test]
    async fn sweep_reclaims_stale_entries() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        limiter.check("wallet-a").await;
        limiter.sweep().await;
        assert_eq!(limiter.windows.read().await.len(), 1);
    }
}
