// =============================================================================
// Circuit Breaker — shields the broker from failure storms
// =============================================================================
//
//     CLOSED ──N failures in window──→ OPEN ──open_for elapsed──→ HALF_OPEN
//        ▲                                                            │
//        │                      probe succeeds                        │
//        └────────────────────────────────────────────────────────────┘
//                                probe fails → OPEN
//
// Only retryable failures (transport, timeout, 5xx) count; a semantic order
// rejection is a healthy broker saying no.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive retryable failures that open the circuit.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window: Duration,
    /// How long the circuit stays open before a half-open probe.
    pub open_for: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            open_for: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
enum State {
    Closed { failures: u32, window_start: Option<Instant> },
    Open { since: Instant },
    HalfOpen,
}

/// Thread-safe three-state circuit breaker.
pub struct CircuitBreaker {
    state: Mutex<State>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(State::Closed { failures: 0, window_start: None }),
            config,
        }
    }

    /// True when a call may proceed. An expired open circuit transitions to
    /// half-open and admits exactly the probing call.
    pub fn is_call_permitted(&self) -> bool {
        let mut state = self.state.lock();
        match &*state {
            State::Closed { .. } => true,
            State::HalfOpen => true,
            State::Open { since } => {
                if since.elapsed() >= self.config.open_for {
                    debug!("circuit breaker OPEN -> HALF_OPEN (probe window)");
                    *state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call; closes the circuit from half-open and clears
    /// the failure count.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match &*state {
            State::HalfOpen => {
                info!("circuit breaker HALF_OPEN -> CLOSED (probe succeeded)");
                *state = State::Closed { failures: 0, window_start: None };
            }
            State::Closed { failures, .. } if *failures > 0 => {
                *state = State::Closed { failures: 0, window_start: None };
            }
            _ => {}
        }
    }

    /// Record a retryable failure.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { failures, window_start } => {
                // Restart the count when the window has lapsed.
                match window_start {
                    Some(start) if start.elapsed() > self.config.failure_window => {
                        *failures = 1;
                        *window_start = Some(Instant::now());
                    }
                    Some(_) => *failures += 1,
                    None => {
                        *failures = 1;
                        *window_start = Some(Instant::now());
                    }
                }
                if *failures >= self.config.failure_threshold {
                    warn!(
                        failures = *failures,
                        threshold = self.config.failure_threshold,
                        open_secs = self.config.open_for.as_secs(),
                        "circuit breaker CLOSED -> OPEN"
                    );
                    *state = State::Open { since: Instant::now() };
                }
            }
            State::HalfOpen => {
                warn!("circuit breaker HALF_OPEN -> OPEN (probe failed)");
                *state = State::Open { since: Instant::now() };
            }
            State::Open { .. } => {}
        }
    }

    /// True when the breaker is currently open (calls rejected).
    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock(), State::Open { since } if since.elapsed() < self.config.open_for)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &*self.state.lock())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_for_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            open_for: Duration::from_millis(open_for_ms),
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker(3, 60_000);
        assert!(cb.is_call_permitted());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_call_permitted());
        cb.record_failure();
        assert!(!cb.is_call_permitted());
        assert!(cb.is_open());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_call_permitted());
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let cb = breaker(1, 0);
        cb.record_failure();
        // open_for of zero: next permission check moves to half-open.
        assert!(cb.is_call_permitted());
        cb.record_success();
        assert!(cb.is_call_permitted());
        assert!(!cb.is_open());
    }

    #[test]
    fn half_open_probe_reopens_on_failure() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        {
            let mut state = cb.state.lock();
            *state = State::HalfOpen;
        }
        cb.record_failure();
        assert!(!cb.is_call_permitted());
    }
}
