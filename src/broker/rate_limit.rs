// =============================================================================
// Token-Bucket Rate Limiter — keeps the engine inside broker API quotas
// =============================================================================
//
// Two limits apply simultaneously:
//   - a token bucket (default 3 req/s, burst 10) for short-term pacing;
//   - a rolling per-minute cap (default 180) as the hard quota.
//
// `acquire` waits for capacity and fails with `DeadlineExceeded` rather than
// blocking past the caller's deadline. The bucket is global across the
// process so parallel order tasks share one budget.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::broker::adapter::BrokerError;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    minute_count: u32,
    minute_started: Instant,
}

/// Process-global token bucket with a per-minute hard cap.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate_per_sec: f64,
    burst: f64,
    per_minute_cap: u32,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: u32, per_minute_cap: u32) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: now,
                minute_count: 0,
                minute_started: now,
            }),
            rate_per_sec: rate_per_sec.max(0.1),
            burst: burst.max(1) as f64,
            per_minute_cap: per_minute_cap.max(1),
        }
    }

    /// Take one token, waiting as needed. Fails with `DeadlineExceeded` when
    /// the wait would run past `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), BrokerError> {
        loop {
            let wait = {
                let mut s = self.state.lock();
                self.refill(&mut s);

                if s.minute_count >= self.per_minute_cap {
                    // Wait for the minute window to roll.
                    let elapsed = s.minute_started.elapsed();
                    let remaining = Duration::from_secs(60).saturating_sub(elapsed);
                    warn!(
                        minute_count = s.minute_count,
                        cap = self.per_minute_cap,
                        wait_ms = remaining.as_millis() as u64,
                        "per-minute request cap reached"
                    );
                    remaining.max(Duration::from_millis(50))
                } else if s.tokens >= 1.0 {
                    s.tokens -= 1.0;
                    s.minute_count += 1;
                    return Ok(());
                } else {
                    let deficit = 1.0 - s.tokens;
                    Duration::from_secs_f64(deficit / self.rate_per_sec)
                }
            };

            if Instant::now() + wait > deadline {
                debug!(wait_ms = wait.as_millis() as u64, "token wait exceeds deadline");
                return Err(BrokerError::DeadlineExceeded);
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (for inspection/tests).
    pub fn available(&self) -> f64 {
        let mut s = self.state.lock();
        self.refill(&mut s);
        s.tokens
    }

    fn refill(&self, s: &mut BucketState) {
        let elapsed = s.last_refill.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            s.tokens = (s.tokens + elapsed * self.rate_per_sec).min(self.burst);
            s.last_refill = Instant::now();
        }
        if s.minute_started.elapsed() >= Duration::from_secs(60) {
            s.minute_count = 0;
            s.minute_started = Instant::now();
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.lock();
        f.debug_struct("TokenBucket")
            .field("tokens", &s.tokens)
            .field("rate_per_sec", &self.rate_per_sec)
            .field("burst", &self.burst)
            .field("minute_count", &s.minute_count)
            .field("per_minute_cap", &self.per_minute_cap)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_tokens_are_immediately_available() {
        let bucket = TokenBucket::new(3.0, 5, 180);
        let deadline = Instant::now() + Duration::from_millis(50);
        for _ in 0..5 {
            bucket.acquire(deadline).await.unwrap();
        }
        assert!(bucket.available() < 1.0);
    }

    #[tokio::test]
    async fn exhausted_bucket_fails_fast_on_tight_deadline() {
        let bucket = TokenBucket::new(1.0, 1, 180);
        bucket
            .acquire(Instant::now() + Duration::from_millis(10))
            .await
            .unwrap();
        // Next token needs ~1s; a 10ms deadline cannot be met.
        let err = bucket
            .acquire(Instant::now() + Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let bucket = TokenBucket::new(100.0, 1, 180);
        let deadline = Instant::now() + Duration::from_secs(5);
        bucket.acquire(deadline).await.unwrap();
        assert!(bucket.available() < 1.0);
        // 100 tokens/s: one token back within ~10ms.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(bucket.available() >= 1.0);
    }
}
