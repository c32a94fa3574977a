use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::GatewayError;

/// One attempt of a retried call, handed to the operation so it can vary
/// its behaviour (e.g. only warn on re-sends) without shared flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
    pub max: u32,
}

impl Attempt {
    pub fn is_first(&self) -> bool {
        self.number == 1
    }

    pub fn is_last(&self) -> bool {
        self.number >= self.max
    }
}

/// Fixed-backoff retry policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub retryable: fn(&GatewayError) -> bool,
}

impl RetryPolicy {
    /// Retry transient ledger errors up to `max_attempts` times in total
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff, retryable: GatewayError::is_transient }
    }

    pub fn retry_if(mut self, retryable: fn(&GatewayError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Run `call` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max = self.max_attempts.max(1);
        let mut number = 1;

        loop {
            let attempt = Attempt { number, max };
            match call(attempt).await {
                Ok(value) => {
                    if !attempt.is_first() {
                        debug!(operation, attempt = number, "ledger call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if !(self.retryable)(&e) => return Err(e),
                Err(e) if attempt.is_last() => {
                    error!(operation, attempts = number, error = %e, "ledger call failed, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        operation,
                        attempt = number,
                        max_attempts = max,
                        backoff_ms = self.backoff.as_millis() as u64,
                        error = %e,
                        "ledger call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    number += 1;
                }
            }
        }
    }
}
