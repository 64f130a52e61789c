use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

/// Bounded retry with a fixed delay, for collaborator operations that hit
/// flaky external tools (clones, builds, downloads).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Retry every failure.
    pub fn run<T>(&self, what: &str, op: impl FnMut() -> Result<T>) -> Result<T> {
        self.run_if(what, op, |_| true)
    }

    /// Retry failures `retryable` accepts; anything else is returned at once.
    pub fn run_if<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T>,
        retryable: impl Fn(&anyhow::Error) -> bool,
    ) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && retryable(&err) => {
                    warn!(
                        operation = what,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "attempt failed; retrying"
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(anyhow!(
                        "{} failed after {} attempt(s): {:#}",
                        what,
                        attempt,
                        err
                    ))
                }
            }
        }
    }
}
