//! Bounded retry of database operations.

use std::future::Future;

use crate::config::RetryPolicy;
use crate::driver::{DriverError, DriverResult};
use crate::error::{Error, Result};

/// Run `op`, retrying connection failures according to `policy`.
///
/// Only [`DriverError::Connection`] is retried. When the attempts run out
/// the last connection error is returned as [`Error::ConnectionFailure`].
/// Any other driver error is returned at once.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    class: &str,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(DriverError::Connection(message)) if attempt < policy.tries => {
                attempt += 1;
                tracing::warn!(
                    class,
                    operation,
                    attempt,
                    tries = policy.tries,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %message,
                    "connection failure, retrying"
                );
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(err) => return Err(Error::from(err)),
        }
    }
}
