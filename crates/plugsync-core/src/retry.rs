use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::error::UpdateError;

pub(crate) async fn run_with_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, UpdateError>
where
    F: Future<Output = Result<T, UpdateError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(UpdateError::Timeout {
            operation,
            seconds: timeout.as_secs(),
        }),
    }
}

/// Run `operation` once per entry of `retry_delays_secs`, sleeping the given
/// delay before each attempt. Stops at the first success or at the first
/// error that is not retryable.
pub(crate) async fn retry_with_delays<T, Op, Fut>(
    operation_name: &'static str,
    retry_delays_secs: &[u64],
    mut operation: Op,
) -> Result<T, UpdateError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpdateError>>,
{
    let mut delays = retry_delays_secs.iter().copied().peekable();
    if delays.peek().is_none() {
        return operation().await;
    }

    let mut attempt = 0_usize;
    loop {
        let delay_secs = delays.next().unwrap_or_default();
        if delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && delays.peek().is_some() => {
                debug!("{operation_name} attempt {attempt} failed: {error}");
            }
            Err(error) => return Err(error),
        }
    }
}
