//! Bounded polling with a fixed interval.
//!
//! Every convergence wait in the engine (group scaled, members healthy,
//! node count, node readiness, member terminated, member detached, node
//! drained) goes through [`RetryPolicy::poll`].

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// How many times to check a condition and how long to wait before each check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Wait `interval`, then evaluate `check`; repeat until it returns
    /// `Ok(true)` or `max_attempts` checks have failed.
    ///
    /// Returns `Ok(attempt)` with the 1-based attempt that passed, or
    /// `Error::Timeout` on exhaustion. Errors from `check` abort immediately.
    pub async fn poll<F, Fut>(&self, what: &str, mut check: F) -> Result<u32>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        for attempt in 1..=self.max_attempts {
            if !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
            if check(attempt).await? {
                return Ok(attempt);
            }
            debug!(what, attempt, max = self.max_attempts, "condition not met");
        }
        Err(Error::Timeout {
            what: what.to_string(),
            attempts: self.max_attempts,
        })
    }
}
