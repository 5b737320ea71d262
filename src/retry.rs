//! Fixed-delay retry policy shared by every collaborator call.
//!
//! Production runs with `max_attempts: None`, which retries forever: a cycle
//! step blocks the orchestrator until the collaborator answers. Tests inject
//! a zero-delay policy, optionally bounded.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// How a failed collaborator call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait between attempts.
    pub delay: Duration,
    /// Give up after this many attempts. `None` retries indefinitely.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Retry forever with the given delay.
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Zero delay, bounded attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `on_error` sees every failure before the wait, which is where callers
    /// record `last_error`. The final error is returned only when the policy
    /// is bounded.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        mut on_error: impl FnMut(&E),
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(call = label, attempt, error = %e, "collaborator call failed");
                    on_error(&e);
                    if !self.should_retry(attempt) {
                        return Err(e);
                    }
                }
            }
            info!(call = label, delay_ms = self.delay.as_millis() as u64, "retrying");
            sleep(self.delay).await;
        }
    }
}
