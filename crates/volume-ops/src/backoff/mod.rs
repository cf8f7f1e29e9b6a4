//! Provides retry timing for cloud operations that take a while to become
//! possible, such as attaching a disk that is still detaching elsewhere.
use std::fmt::Display;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Determines how long to back off before performing a retry.
pub trait BackoffStrategy {
    /// Resets the strategy after a success.
    fn reset(&mut self);
    /// Gets how long to wait before retrying.
    fn next_duration(&mut self) -> Duration;
}

/// A `BackoffStrategy` that always waits the same amount of time.
#[derive(Clone, Debug)]
pub struct FixedIntervalStrategy {
    interval: Duration,
}

impl FixedIntervalStrategy {
    /// Creates a strategy that waits `interval` between every attempt.
    pub fn new(interval: Duration) -> Self {
        FixedIntervalStrategy { interval }
    }
}

impl Default for FixedIntervalStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl BackoffStrategy for FixedIntervalStrategy {
    fn reset(&mut self) {}

    fn next_duration(&mut self) -> Duration {
        self.interval
    }
}

/// How long to keep retrying an operation, and how long to wait between
/// attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Measured from the start of the first attempt. No attempt is started once
    /// it has passed.
    pub deadline: Duration,
    /// The fixed wait between a failed attempt and the next one.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            deadline: Duration::from_secs(180),
            interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds or the deadline passes, waiting a
    /// fixed interval between attempts. See [`retry_until`].
    pub fn run<T, E, F>(&self, operation: &str, attempt: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut backoff = FixedIntervalStrategy::new(self.interval);
        retry_until(self.deadline, &mut backoff, operation, attempt)
    }
}

/// Invokes `attempt` until it returns `Ok` or `deadline` has passed since the
/// first invocation.
///
/// Every error is treated as retryable. The value of the first success is
/// returned immediately; if no attempt succeeds, the error from the last one
/// is returned. An attempt is only started while the deadline has not yet
/// passed, so a deadline shorter than the backoff allows exactly one attempt.
pub fn retry_until<B, T, E, F>(
    deadline: Duration,
    backoff: &mut B,
    operation: &str,
    mut attempt: F,
) -> Result<T, E>
where
    B: BackoffStrategy + ?Sized,
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let start = Instant::now();
    let mut attempts: u32 = 1;
    loop {
        match attempt() {
            Ok(value) => {
                if attempts > 1 {
                    info!(operation, attempts, "Succeeded after retrying");
                }
                backoff.reset();
                return Ok(value);
            }
            Err(e) => {
                let wait = backoff.next_duration();
                if start.elapsed() + wait >= deadline {
                    warn!(
                        operation,
                        attempts,
                        error = %e,
                        "Giving up: retry deadline of {:?} reached",
                        deadline
                    );
                    return Err(e);
                }
                warn!(
                    operation,
                    attempts,
                    error = %e,
                    "Attempt failed, retrying in {:?}",
                    wait
                );
                std::thread::sleep(wait);
                attempts += 1;
            }
        }
    }
}
