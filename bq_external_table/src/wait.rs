//! Retrying operations with exponential backoff.

use std::time::Duration;
use tokio::time::sleep;

use crate::common::*;

/// Options for retrying operations.
#[derive(Clone, Debug)]
pub(crate) struct WaitOptions {
    retry_interval: Duration,
    allowed_errors: usize,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            allowed_errors: 3,
        }
    }
}

impl WaitOptions {
    /// Set the initial retry interval.
    pub(crate) fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Set the number of allowed errors before giving up.
    pub(crate) fn allowed_errors(mut self, allowed_errors: usize) -> Self {
        self.allowed_errors = allowed_errors;
        self
    }
}

/// The result of one attempt.
#[derive(Debug)]
pub(crate) enum WaitStatus<T, E> {
    /// The operation finished successfully.
    Finished(T),
    /// The operation failed, but trying again may help.
    FailedTemporarily(E),
    /// The operation failed and should not be retried.
    FailedPermanently(E),
}

/// Run `f` until it finishes, fails permanently, or fails temporarily more
/// than `options.allowed_errors` times. The delay doubles after each retry.
pub(crate) async fn wait<T, E, F, Fut>(options: &WaitOptions, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WaitStatus<T, E>>,
{
    let mut errors = 0;
    let mut interval = options.retry_interval;

    loop {
        match f().await {
            WaitStatus::Finished(result) => return Ok(result),
            WaitStatus::FailedPermanently(err) => return Err(err),
            WaitStatus::FailedTemporarily(err) => {
                errors += 1;
                if errors > options.allowed_errors {
                    return Err(err);
                }

                trace!(
                    "operation failed temporarily, retrying in {:?} (attempt {}/{})",
                    interval,
                    errors,
                    options.allowed_errors
                );

                sleep(interval).await;

                interval = interval.saturating_mul(2);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn wait_retries_temporary_failures() {
    let mut attempts = 0;
    let opt = WaitOptions::default().allowed_errors(2);
    let result: Result<usize, &str> = wait(&opt, || {
        attempts += 1;
        let attempt = attempts;
        async move {
            if attempt < 3 {
                WaitStatus::FailedTemporarily("busy")
            } else {
                WaitStatus::Finished(attempt)
            }
        }
    })
    .await;
    assert_eq!(result, Ok(3));
}

#[tokio::test(start_paused = true)]
async fn wait_gives_up_after_allowed_errors() {
    let opt = WaitOptions::default()
        .retry_interval(Duration::from_millis(10))
        .allowed_errors(1);
    let result: Result<(), &str> =
        wait(&opt, || async { WaitStatus::FailedTemporarily("busy") }).await;
    assert_eq!(result, Err("busy"));
}

#[tokio::test]
async fn wait_does_not_retry_permanent_failures() {
    let mut attempts = 0;
    let result: Result<(), &str> = wait(&WaitOptions::default(), || {
        attempts += 1;
        async { WaitStatus::FailedPermanently("denied") }
    })
    .await;
    assert_eq!(result, Err("denied"));
    assert_eq!(attempts, 1);
}
