//! Retry decisions with exponential backoff for wger API calls.
//!
//! Retries on transient errors (429 rate limit, 502/503/504, connection failures,
//! timeouts). Does NOT retry on other HTTP statuses or on errors it cannot
//! classify.

use crate::error::ApiError;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use wger_core::{Clock, RandomSource, RetryConfig};

/// Immutable retry configuration plus the injected clock and random source.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ratio: f64,
    retryable_status_codes: BTreeSet<u16>,
    retry_on_network_error: bool,
    retry_on_timeout: bool,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        let jitter_ratio = if config.jitter_ratio.is_nan() {
            0.0
        } else {
            config.jitter_ratio.clamp(0.0, 1.0)
        };
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter_ratio,
            retryable_status_codes: config.retryable_status_codes.iter().copied().collect(),
            retry_on_network_error: config.retry_on_network_error,
            retry_on_timeout: config.retry_on_timeout,
            clock,
            random,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Whether `error`, raised by 1-based attempt `attempt`, deserves another try.
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        // A status code settles it, whatever else the error looks like.
        if let Some(status) = error.status() {
            return self.retryable_status_codes.contains(&status);
        }

        if self.retry_on_network_error && error.is_network_failure() {
            return true;
        }

        self.retry_on_timeout && error.is_timeout()
    }

    /// Backoff before the attempt following `attempt`, in milliseconds.
    ///
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`, plus uniform jitter in
    /// `[-ratio, +ratio] * capped`, floored at 0.
    pub fn retry_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.max(1) - 1;
        let exponential = self.base_delay_ms as f64 * 2f64.powi(exponent.min(1023) as i32);
        let capped = exponential.min(self.max_delay_ms as f64);

        let spread = (self.random.next_f64() * 2.0 - 1.0) * self.jitter_ratio;
        let delayed = capped + spread * capped;

        delayed.max(0.0).round() as u64
    }

    /// Wait out the backoff for `attempt` on the injected clock.
    /// Returns how long it waited.
    pub async fn delay(&self, attempt: u32) -> Duration {
        let wait = Duration::from_millis(self.retry_delay(attempt));
        self.clock.sleep(wait).await;
        wait
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("retry_on_network_error", &self.retry_on_network_error)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wger_core::{FixedRandom, ManualClock};

    fn policy(config: RetryConfig, random: f64) -> RetryPolicy {
        RetryPolicy::new(
            &config,
            Arc::new(ManualClock::default()),
            Arc::new(FixedRandom(random)),
        )
    }

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            status_text: String::new(),
            body: None,
        }
    }

    fn network(code: &str) -> ApiError {
        ApiError::Network {
            code: Some(code.to_string()),
            message: "No response received from server".to_string(),
        }
    }

    fn timeout() -> ApiError {
        ApiError::Timeout {
            timeout_ms: 5000,
            message: "timeout of 5000ms exceeded".to_string(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        let p = policy(RetryConfig::default(), 0.5);
        for status in [429, 502, 503, 504] {
            assert!(p.should_retry(&http(status), 1), "{status} should retry");
        }
        for status in [400, 401, 403, 404, 500] {
            assert!(!p.should_retry(&http(status), 1), "{status} should not retry");
        }
    }

    #[test]
    fn test_attempt_limit_checked_first() {
        let p = policy(RetryConfig::default(), 0.5);
        assert!(p.should_retry(&http(503), 2));
        assert!(!p.should_retry(&http(503), 3));
        assert!(!p.should_retry(&network("ECONNRESET"), 3));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let p = policy(
            RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            },
            0.5,
        );
        assert_eq!(p.max_attempts(), 1);
        assert!(!p.should_retry(&http(503), 1));
    }

    #[test]
    fn test_network_and_timeout_flags() {
        let p = policy(RetryConfig::default(), 0.5);
        assert!(p.should_retry(&network("ECONNREFUSED"), 1));
        assert!(p.should_retry(&timeout(), 1));

        let strict = policy(
            RetryConfig {
                retry_on_network_error: false,
                retry_on_timeout: false,
                ..RetryConfig::default()
            },
            0.5,
        );
        assert!(!strict.should_retry(&network("ECONNREFUSED"), 1));
        assert!(!strict.should_retry(&timeout(), 1));
    }

    #[test]
    fn test_unknown_errors_fail_closed() {
        let p = policy(RetryConfig::default(), 0.5);
        let odd = ApiError::Network {
            code: Some("EPROTO".to_string()),
            message: "protocol error".to_string(),
        };
        assert!(!p.should_retry(&odd, 1));
        assert!(!p.should_retry(&ApiError::Aborted, 1));
        assert!(!p.should_retry(&ApiError::InvalidRequest("bad".into()), 1));
    }

    #[test]
    fn test_delay_without_jitter_doubles_then_caps() {
        let p = policy(
            RetryConfig {
                base_delay_ms: 100,
                max_delay_ms: 1000,
                jitter_ratio: 0.0,
                ..RetryConfig::default()
            },
            0.9,
        );
        let delays: Vec<u64> = (1..=6).map(|n| p.retry_delay(n)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_jitter_extremes() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_ratio: 0.5,
            ..RetryConfig::default()
        };
        // random 0.0 → -ratio, random 0.5 → no jitter
        assert_eq!(policy(config.clone(), 0.0).retry_delay(1), 500);
        assert_eq!(policy(config.clone(), 0.5).retry_delay(1), 1000);
        let high = policy(config, 1.0).retry_delay(1);
        assert!((1499..=1500).contains(&high));
    }

    #[test]
    fn test_jitter_ratio_clamped() {
        let p = policy(
            RetryConfig {
                jitter_ratio: 4.0,
                ..RetryConfig::default()
            },
            0.0,
        );
        assert_eq!(p.jitter_ratio(), 1.0);
        assert_eq!(p.retry_delay(1), 0);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let p = policy(
            RetryConfig {
                jitter_ratio: 0.0,
                ..RetryConfig::default()
            },
            0.5,
        );
        assert_eq!(p.retry_delay(u32::MAX), 30_000);
    }

    #[tokio::test]
    async fn test_delay_sleeps_on_injected_clock() {
        let clock = Arc::new(ManualClock::default());
        let p = RetryPolicy::new(
            &RetryConfig {
                base_delay_ms: 250,
                jitter_ratio: 0.0,
                ..RetryConfig::default()
            },
            clock.clone(),
            Arc::new(FixedRandom(0.5)),
        );
        let waited = p.delay(2).await;
        assert_eq!(waited, Duration::from_millis(500));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
    }
}
