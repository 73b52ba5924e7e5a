//! Explicit context for remote calls.
//!
//! A [`Session`] carries authentication, the retry policy and the request
//! timeout. It is passed into every resolver and backend call; there is no
//! global client state.

use crate::auth::{CloudAuth, NoAuth};
use crate::retry::{with_retry, RetryPolicy, Transient};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct Session {
    auth: Arc<dyn CloudAuth>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Session {
    /// Anonymous session with default retry policy and timeout.
    pub fn new() -> Self {
        Self {
            auth: Arc::new(NoAuth),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_auth(mut self, auth: impl CloudAuth + 'static) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn auth(&self) -> &dyn CloudAuth {
        self.auth.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `op` under this session's retry policy.
    pub fn retry<T, E, F>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Result<T, E>,
    {
        with_retry(&self.retry, what, |_| op())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
