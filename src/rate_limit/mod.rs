// Per-user throttle for tool calls.
//
// One token bucket per local user, shared by all of that user's sessions.
// Capacity is `calls_per_minute`; refill is continuous at capacity/60 per second.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Token bucket for a single user.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    /// Try to consume one token. On failure returns how long until one is available.
    fn try_consume(&mut self, capacity: u64) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let refill_rate = capacity as f64 / 60.0;
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / refill_rate))
        }
    }
}

/// Per-user token bucket rate limiter.
///
/// Buckets are created lazily on first call. State is in-memory only (resets on restart).
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and consume one token for `user_id` at `limit_per_minute`.
    ///
    /// A limit of 0 disables throttling. `Err` carries the suggested wait.
    pub fn check_and_consume(&self, user_id: &str, limit_per_minute: u64) -> Result<(), Duration> {
        if limit_per_minute == 0 {
            return Ok(());
        }
        let mut bucket = self
            .buckets
            .entry(user_id.to_string())
            .or_insert_with(|| TokenBucket::new(limit_per_minute));
        bucket.try_consume(limit_per_minute)
    }
}
