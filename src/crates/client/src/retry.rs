//! Retry policy as a pure decision function.
//!
//! The executor loop only executes decisions; everything about *whether* and
//! *how long* lives here, deterministic once the jitter draw is fixed.

use std::time::Duration;

use rand::Rng;

use crate::error::GatewayError;

/// Maximum jitter added on top of the computed delay, as a fraction.
const JITTER_FRACTION: f64 = 0.3;

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn give_up() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Retry budget and backoff shape for one request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retry ceiling for network/timeout/server failures.
    pub max_retries: u32,
    /// Retry ceiling for rate-limit responses (they resolve themselves).
    pub rate_limit_max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed delay, before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all; every failure surfaces immediately.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            rate_limit_max_retries: 0,
            ..Self::default()
        }
    }

    /// Decide whether attempt `attempt` (1-based, the one that just failed)
    /// should be followed by another.
    pub fn decide(&self, error: &GatewayError, attempt: u32) -> RetryDecision {
        let jitter = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
        self.decide_with_jitter(error, attempt, jitter)
    }

    /// Deterministic variant; `jitter` must be in `[0, 0.3)`.
    pub fn decide_with_jitter(&self, error: &GatewayError, attempt: u32, jitter: f64) -> RetryDecision {
        match error {
            GatewayError::Network { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::Server { .. } => {
                if attempt > self.max_retries {
                    return RetryDecision::give_up();
                }
                RetryDecision {
                    should_retry: true,
                    delay: self.backoff_delay(attempt, jitter),
                }
            }
            GatewayError::RateLimited { retry_after, .. } => {
                if attempt > self.rate_limit_max_retries {
                    return RetryDecision::give_up();
                }
                // A server-supplied delay overrides computed backoff.
                let delay = retry_after.unwrap_or_else(|| self.backoff_delay(attempt, jitter));
                RetryDecision {
                    should_retry: true,
                    delay,
                }
            }
            GatewayError::Client { .. }
            | GatewayError::Parse { .. }
            | GatewayError::Aborted { .. }
            | GatewayError::Unknown { .. } => RetryDecision::give_up(),
        }
    }

    /// Exponential delay for a 1-based attempt number, capped, then jittered.
    fn backoff_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let base_ms = self.base_delay.as_millis() as u64;
        let computed = base_ms.saturating_mul(1_u64 << shift);
        let capped = computed.min(self.max_delay.as_millis() as u64);
        let jittered = (capped as f64 * (1.0 + jitter)) as u64;
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(attempts: u32) -> GatewayError {
        GatewayError::Server {
            status: 503,
            url: "http://svc".into(),
            attempts,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn doubles_delay_per_attempt_without_jitter() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        let d1 = policy.decide_with_jitter(&server_error(1), 1, 0.0);
        let d2 = policy.decide_with_jitter(&server_error(2), 2, 0.0);
        let d3 = policy.decide_with_jitter(&server_error(3), 3, 0.0);
        assert_eq!(d1.delay, Duration::from_millis(100));
        assert_eq!(d2.delay, Duration::from_millis(200));
        assert_eq!(d3.delay, Duration::from_millis(400));
        assert!(d1.should_retry && d2.should_retry && d3.should_retry);
    }

    #[test]
    fn caps_delay_before_jitter() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(2_500),
            ..RetryPolicy::default()
        };
        let decision = policy.decide_with_jitter(&server_error(3), 3, 0.0);
        assert_eq!(decision.delay, Duration::from_millis(2_500));
    }

    #[test]
    fn jitter_stays_within_thirty_percent() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1_000),
            ..RetryPolicy::default()
        };
        let low = policy.decide_with_jitter(&server_error(1), 1, 0.0).delay;
        let high = policy.decide_with_jitter(&server_error(1), 1, 0.299).delay;
        assert_eq!(low, Duration::from_millis(1_000));
        assert!(high <= Duration::from_millis(1_300));
        assert!(high >= low);
    }

    #[test]
    fn stops_after_max_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.decide_with_jitter(&server_error(3), 3, 0.0).should_retry);
        assert!(!policy.decide_with_jitter(&server_error(4), 4, 0.0).should_retry);
    }

    #[test]
    fn rate_limit_prefers_server_supplied_delay() {
        let policy = RetryPolicy::default();
        let err = GatewayError::RateLimited {
            status: 429,
            url: "http://svc".into(),
            attempts: 1,
            retry_after: Some(Duration::from_secs(9)),
        };
        let decision = policy.decide_with_jitter(&err, 1, 0.25);
        assert!(decision.should_retry);
        assert_eq!(decision.delay, Duration::from_secs(9));
    }

    #[test]
    fn rate_limit_has_its_own_ceiling() {
        let policy = RetryPolicy::default();
        let err = GatewayError::RateLimited {
            status: 429,
            url: "http://svc".into(),
            attempts: 4,
            retry_after: None,
        };
        assert!(policy.decide_with_jitter(&err, 4, 0.0).should_retry);
        assert!(!policy.decide_with_jitter(&err, 5, 0.0).should_retry);
    }

    #[test]
    fn never_retries_client_parse_or_aborted() {
        let policy = RetryPolicy::default();
        let client = GatewayError::Client {
            status: 422,
            url: "http://svc".into(),
            message: "bad body".into(),
        };
        let parse = GatewayError::Parse {
            message: "bad json".into(),
        };
        let aborted = GatewayError::Aborted {
            url: "http://svc".into(),
        };
        for err in [client, parse, aborted] {
            assert!(!policy.decide_with_jitter(&err, 1, 0.0).should_retry);
        }
    }
}
