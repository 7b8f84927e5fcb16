//! Retry and backoff policy for transfer tasks
//!
//! Classifies executor failures as transient or permanent and decides whether
//! a failed task is re-queued (and after how long) or given up on.

use std::time::Duration;

use esync_core::config::RetryConfig;
use esync_core::ports::StoreError;

use crate::executor::TransferError;

/// How a failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// May succeed if retried later
    Transient,
    /// Retrying will not help
    Permanent,
    /// The job was cancelled; not a fault
    Cancelled,
}

/// Classifies an executor failure.
///
/// Source `NotFound` counts as transient: the source listed the file moments
/// ago, so it was most likely replaced or renamed after the diff. If it stays
/// missing the retry ceiling turns it into a permanent failure.
pub fn classify(err: &TransferError) -> FailureClass {
    match err {
        TransferError::Cancelled => FailureClass::Cancelled,
        TransferError::Source(StoreError::NotFound(_)) => FailureClass::Transient,
        TransferError::Source(e) | TransferError::Destination(e) => {
            if e.is_transient() {
                FailureClass::Transient
            } else {
                FailureClass::Permanent
            }
        }
        TransferError::ChecksumMismatch { .. } | TransferError::SizeMismatch { .. } => {
            FailureClass::Transient
        }
    }
}

/// What to do with a task after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue after the given delay
    RetryAfter(Duration),
    /// Mark the task permanently failed
    GiveUp,
}

/// Exponential backoff with a retry ceiling
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Policy that retries immediately, for tests
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Backoff before retry number `retry` (0 for the first retry):
    /// `base * 2^retry`, capped at `max_delay`, plus up to `jitter_factor` of
    /// that value at random.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = (base_ms * 2f64.powi(retry.min(30) as i32))
            .min(self.max_delay.as_millis() as f64);

        let jitter = 1.0 + rand::random::<f64>() * self.jitter_factor;
        Duration::from_millis((delay_ms * jitter).max(0.0) as u64)
    }

    /// Decides the fate of a task whose attempt number `attempt` (1-based)
    /// just failed with `err`.
    pub fn decide(&self, attempt: u32, err: &TransferError) -> RetryDecision {
        if classify(err) != FailureClass::Transient {
            return RetryDecision::GiveUp;
        }
        // `attempt - 1` retries have been used so far
        let retries_used = attempt.saturating_sub(1);
        if retries_used >= self.max_retries {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.delay_for_retry(retries_used);
        if let TransferError::Source(e) | TransferError::Destination(e) = err {
            if let Some(requested) = e.retry_after() {
                delay = delay.max(requested);
            }
        }
        RetryDecision::RetryAfter(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esync_core::domain::Checksum;

    fn timeout() -> TransferError {
        TransferError::Destination(StoreError::Timeout("upload".into()))
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&timeout()), FailureClass::Transient);
        assert_eq!(
            classify(&TransferError::Source(StoreError::Server {
                status: 503,
                message: "unavailable".into()
            })),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&TransferError::Destination(StoreError::RateLimited {
                retry_after: None
            })),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&TransferError::Source(StoreError::NotFound("/a".into()))),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&TransferError::ChecksumMismatch {
                expected: Checksum::new("sha256", "a"),
                actual: Checksum::new("sha256", "b"),
            }),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&TransferError::Destination(StoreError::Forbidden("no".into()))),
            FailureClass::Permanent
        );
        assert_eq!(
            classify(&TransferError::Source(StoreError::Unauthorized("expired".into()))),
            FailureClass::Permanent
        );
        assert_eq!(
            classify(&TransferError::Destination(StoreError::Rejected {
                status: 413,
                message: "too large".into()
            })),
            FailureClass::Permanent
        );
        assert_eq!(classify(&TransferError::Cancelled), FailureClass::Cancelled);
    }

    #[test]
    fn test_exponential_delay_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_retry(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        };
        for _ in 0..100 {
            let delay = policy.delay_for_retry(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_retry_ceiling() {
        let policy = RetryPolicy::immediate(3);
        // Attempts 1..=3 failing leave retries available; attempt 4 is the last
        for attempt in 1..=3 {
            assert!(matches!(
                policy.decide(attempt, &timeout()),
                RetryDecision::RetryAfter(_)
            ));
        }
        assert_eq!(policy.decide(4, &timeout()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_retries_gives_up_at_once() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.decide(1, &timeout()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::immediate(3);
        let err = TransferError::Destination(StoreError::Forbidden("denied".into()));
        assert_eq!(policy.decide(1, &err), RetryDecision::GiveUp);
        assert_eq!(policy.decide(1, &TransferError::Cancelled), RetryDecision::GiveUp);
    }

    #[test]
    fn test_provider_retry_after_extends_delay() {
        let policy = RetryPolicy::immediate(3);
        let err = TransferError::Destination(StoreError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        });
        assert_eq!(
            policy.decide(1, &err),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_default_policy_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
