/// Token-bucket rate limiter for DOM-touching operations.
///
/// Every scan, click, and send `await`s on `acquire()` first; the call
/// returns immediately while a token is available and sleeps until the
/// next refill otherwise. With capacity 1 this degenerates to a minimum
/// inter-operation delay, which is what keeps the automation's
/// interaction cadence under the remote service's radar.
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct RateLimiter {
    /// Maximum tokens in the bucket (= burst capacity).
    capacity: u32,
    /// Current available tokens.
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    /// Last time tokens were refilled.
    last_refill: Instant,
}

impl RateLimiter {
    /// * `capacity`    – burst capacity (max tokens)
    /// * `per_second`  – sustained rate (tokens/second)
    pub fn new(capacity: u32, per_second: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate: per_second,
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Try to consume one token. Returns the wait duration if no token is
    /// available.
    fn try_consume(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let needed = 1.0 - self.tokens;
            let wait_secs = needed / self.refill_rate;
            Some(Duration::from_secs_f64(wait_secs))
        }
    }
}

/// Thread-safe limiter shared across the orchestrator's operations.
pub struct DomRateLimiter(Mutex<RateLimiter>);

impl DomRateLimiter {
    pub fn new(capacity: u32, per_second: f64) -> Self {
        Self(Mutex::new(RateLimiter::new(capacity, per_second)))
    }

    /// Minimum-delay limiter: one operation per `delay`, no burst.
    pub fn from_min_delay(delay: Duration) -> Self {
        let secs = delay.as_secs_f64().max(0.001);
        Self::new(1, 1.0 / secs)
    }

    /// Acquire one operation token, sleeping if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.0.lock().await;
                inner.try_consume()
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_immediate() {
        let mut rl = RateLimiter::new(5, 5.0);
        // First 5 tokens should be available immediately
        for _ in 0..5 {
            assert!(rl.try_consume().is_none());
        }
    }

    #[test]
    fn test_token_bucket_exhausted() {
        let mut rl = RateLimiter::new(2, 1.0);
        assert!(rl.try_consume().is_none());
        assert!(rl.try_consume().is_none());
        // Bucket empty — should return a wait duration
        let wait = rl.try_consume();
        assert!(wait.is_some());
        assert!(wait.unwrap().as_secs_f64() > 0.0);
    }

    #[test]
    fn test_min_delay_limits_to_single_token() {
        let mut rl = RateLimiter::new(1, 1.0);
        assert!(rl.try_consume().is_none());
        let wait = rl.try_consume().unwrap();
        assert!(wait.as_secs_f64() <= 1.0);
    }

    #[tokio::test]
    async fn test_dom_rate_limiter_acquire() {
        let limiter = DomRateLimiter::new(3, 100.0); // high rate so test is fast
        for _ in 0..3 {
            limiter.acquire().await;
        }
    }
}
