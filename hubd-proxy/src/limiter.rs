//! Token-bucket rate limiting keyed by application id.
//!
//! Each key gets its own bucket whose max/window come from the catalog
//! row on first use. Tokens refill at a constant rate.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Bucket {
    tokens: f64,
    max_tokens: f64,
    window: Duration,
    last_refill: Instant,
}

/// Refill tokens based on elapsed time, then try to consume one.
fn refill_and_try_consume(bucket: &mut Bucket) -> bool {
    let now = Instant::now();
    let elapsed = now.duration_since(bucket.last_refill);
    let refill =
        (elapsed.as_secs_f64() / bucket.window.as_secs_f64()) * bucket.max_tokens;
    bucket.tokens = (bucket.tokens + refill).min(bucket.max_tokens);
    bucket.last_refill = now;

    if bucket.tokens >= 1.0 {
        bucket.tokens -= 1.0;
        true
    } else {
        false
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the request is admitted, `false` when rate-limited.
    pub fn try_acquire(&self, key: &str, max: u64, window_seconds: u64) -> bool {
        let max_tokens = max.max(1) as f64;
        let window = Duration::from_secs(window_seconds.max(1));
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: max_tokens,
            max_tokens,
            window,
            last_refill: Instant::now(),
        });
        refill_and_try_consume(entry.value_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_exhausts_then_refuses() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.try_acquire("app1", 3, 3600));
        }
        assert!(!limiter.try_acquire("app1", 3, 3600));
        // Other keys are independent.
        assert!(limiter.try_acquire("app2", 3, 3600));
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_acquire("k", 1, 1));
        assert!(!limiter.try_acquire("k", 1, 1));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.try_acquire("k", 1, 1));
    }
}
