//! Consecutive-failure circuit breaker, one instance per upstream client.
//!
//! ```text
//! CLOSED ──[failures >= threshold]──► OPEN ──[reset timeout elapsed]──► HALF_OPEN
//!   ▲                                  ▲                                  │
//!   │                                  └───────────[any failure]──────────┤
//!   └──────────────────[half_open_max_calls successes]────────────────────┘
//! ```

use crate::error::ApiError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use wger_core::clock::to_chrono;
use wger_core::{CircuitBreakerConfig, Clock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the breaker's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_call_count: u32,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitSnapshot>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            half_open_max_calls: config.half_open_max_calls,
            clock,
            inner: Mutex::new(CircuitSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_call_count: 0,
                next_attempt_time: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.lock().clone()
    }

    /// Whether a call may go out now. An expired OPEN circuit moves to
    /// HALF_OPEN here and lets the call through.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let ready = inner.next_attempt_time.map_or(true, |at| now >= at);
                if ready {
                    tracing::debug!("Circuit breaker half-open, probing upstream");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_call_count = 0;
                }
                ready
            }
            CircuitState::HalfOpen => inner.half_open_call_count < self.half_open_max_calls,
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_call_count += 1;
                if inner.half_open_call_count >= self.half_open_max_calls {
                    tracing::info!(
                        "Circuit breaker closed after {} successful probes",
                        inner.half_open_call_count
                    );
                    Self::close(&mut inner);
                }
            }
            // Late completion of a call issued before the circuit opened.
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Open => {}
        }
    }

    /// Error returned to callers rejected while the circuit is open.
    pub fn open_error(&self) -> ApiError {
        let inner = self.lock();
        ApiError::CircuitOpen {
            state: inner.state,
            next_attempt_at: inner.next_attempt_time.unwrap_or_else(|| self.clock.now()),
        }
    }

    /// Force CLOSED with all counters zeroed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        Self::close(&mut inner);
    }

    fn open(&self, inner: &mut CircuitSnapshot) {
        let next = self.clock.now() + to_chrono(self.reset_timeout);
        tracing::warn!(
            "Circuit breaker opened after {} consecutive failures, retry at {}",
            inner.failure_count,
            next
        );
        inner.state = CircuitState::Open;
        inner.half_open_call_count = 0;
        inner.next_attempt_time = Some(next);
    }

    fn close(inner: &mut CircuitSnapshot) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_call_count = 0;
        inner.next_attempt_time = None;
    }

    fn lock(&self) -> MutexGuard<'_, CircuitSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("half_open_max_calls", &self.half_open_max_calls)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wger_core::ManualClock;

    fn breaker(threshold: u32, half_open: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: 10_000,
            half_open_max_calls: half_open,
        };
        (CircuitBreaker::new(&config, clock.clone()), clock)
    }

    #[test]
    fn test_opens_at_threshold_not_before() {
        let (cb, _) = breaker(3, 1);
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let (cb, _) = breaker(2, 1);
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[test]
    fn test_zero_threshold_opens_on_first_failure() {
        let (cb, _) = breaker(0, 1);
        assert!(cb.can_execute());
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_after_reset_timeout() {
        let (cb, clock) = breaker(1, 2);
        cb.on_failure();
        clock.advance(Duration::from_millis(9_999));
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(1));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // failure count is left alone on the way into half-open
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[test]
    fn test_half_open_closes_after_max_successes() {
        let (cb, clock) = breaker(1, 2);
        cb.on_failure();
        clock.advance(Duration::from_secs(10));
        assert!(cb.can_execute());

        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        let snap = cb.snapshot();
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.half_open_call_count, 0);
        assert_eq!(snap.next_attempt_time, None);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (cb, clock) = breaker(1, 3);
        cb.on_failure();
        clock.advance(Duration::from_secs(10));
        assert!(cb.can_execute());
        cb.on_success();
        cb.on_failure();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.half_open_call_count, 0);
        assert_eq!(
            snap.next_attempt_time,
            Some(clock.now() + chrono::Duration::seconds(10))
        );
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_half_open_call_budget() {
        let (cb, clock) = breaker(1, 1);
        cb.on_failure();
        clock.advance(Duration::from_secs(10));
        assert!(cb.can_execute());
        // Budget is spent by completed probes; a probe in flight does not consume it.
        assert!(cb.can_execute());
    }

    #[test]
    fn test_open_error_carries_retry_time() {
        let (cb, clock) = breaker(1, 1);
        cb.on_failure();
        match cb.open_error() {
            ApiError::CircuitOpen {
                state,
                next_attempt_at,
            } => {
                assert_eq!(state, CircuitState::Open);
                assert_eq!(next_attempt_at, clock.now() + chrono::Duration::seconds(10));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reset() {
        let (cb, _) = breaker(1, 1);
        cb.on_failure();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn test_outcomes_while_open_are_ignored() {
        let (cb, _) = breaker(1, 1);
        cb.on_failure();
        let before = cb.snapshot();
        cb.on_success();
        cb.on_failure();
        assert_eq!(cb.snapshot(), before);
    }
}
