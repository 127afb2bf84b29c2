use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

/// Maximum number of retries for transient failures.
/// 3 retries with exponential backoff rides out a backend restart without
/// making the user wait more than a few seconds.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// `base × 2^attempt + jitter` with jitter in `[0, base)`, so each delay
    /// is strictly longer than the one before it.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms.max(1);
        let jitter = rand::thread_rng().gen_range(0..base);
        Self::delay_with_jitter(base, attempt, jitter)
    }

    fn delay_with_jitter(base: u64, attempt: u32, jitter: u64) -> Duration {
        let backoff = base.saturating_mul(1u64 << attempt.min(32));
        Duration::from_millis(backoff.saturating_add(jitter))
    }

    pub fn can_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// 5xx and 408 are worth another attempt; other statuses are final.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
    }

    /// Failures where no response arrived at all
    pub fn is_retryable_error(error: &reqwest::Error) -> bool {
        !error.is_builder() && error.status().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_strictly_increasing_at_jitter_extremes() {
        let base = 1000;
        for attempt in 0..3 {
            let worst_current = RetryPolicy::delay_with_jitter(base, attempt, base - 1);
            let best_next = RetryPolicy::delay_with_jitter(base, attempt + 1, 0);
            assert!(best_next > worst_current);
        }
    }

    #[test]
    fn test_delay_range() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(4000));
            assert!(delay < Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(RetryPolicy::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(RetryPolicy::is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(RetryPolicy::is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!RetryPolicy::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!RetryPolicy::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!RetryPolicy::is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
