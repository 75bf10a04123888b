//! Retry until success or deadline.
//!
//! Masks transient failures, mainly the window right after a cluster start
//! where nodes do not accept connections yet. Only errors accepted by the
//! `bypass` predicate are retried; anything else propagates on the spot.
//! The deadline is wall-clock, so the number of attempts varies with load.


use std::thread::sleep;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::warn;

use crate::RetryPolicy;

#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    timeout: Duration,
    interval: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::from_policy(&RetryPolicy::default())
    }
}

impl RetryExecutor {
    pub fn new(
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self { timeout, interval }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.timeout(), policy.interval())
    }

    pub fn with_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls `op` until it succeeds.
    ///
    /// A bypassed error is retried after `interval` unless more than
    /// `timeout` has elapsed since the first attempt, in which case that
    /// error is returned.
    pub fn run<T, E, F, P>(
        &self,
        mut op: F,
        bypass: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("succeeded after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Err(e) if bypass(&e) => {
                    if Instant::now() > deadline {
                        warn!(
                            "giving up after {} attempts ({:?}): {}",
                            attempt, self.timeout, e
                        );
                        return Err(e);
                    }
                    debug!("attempt {} failed, retrying: {}", attempt, e);
                    sleep(self.interval);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// [`RetryExecutor::run`] with the default pause between attempts.
pub fn retry_till_success<T, E, F, P>(
    op: F,
    timeout: Duration,
    bypass: P,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    RetryExecutor::default().with_timeout(timeout).run(op, bypass)
}
