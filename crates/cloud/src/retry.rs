//! Bounded retries with exponential backoff.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use tracing::warn;

/// Retry settings for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base · 2^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Errors that may go away when the call is repeated.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for crate::error::CloudError {
    fn is_transient(&self) -> bool {
        crate::error::CloudError::is_transient(self)
    }
}

impl Transient for zonestats_core::Error {
    fn is_transient(&self) -> bool {
        zonestats_core::Error::is_transient(self)
    }
}

/// Run `op` until it succeeds, fails permanently or retries run out.
///
/// `op` receives the attempt number, starting at 0. Blocks the calling
/// thread between attempts.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 500,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, CloudError> = with_retry(&fast(3), "flaky", |attempt| {
            calls += 1;
            if attempt < 2 {
                Err(CloudError::Network("reset".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), CloudError> = with_retry(&fast(2), "down", |_| {
            calls += 1;
            Err(CloudError::Status {
                status: 503,
                url: "u".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_errors_not_retried() {
        let mut calls = 0;
        let result: Result<(), CloudError> = with_retry(&fast(5), "missing", |_| {
            calls += 1;
            Err(CloudError::NotFound { what: "x".into() })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
