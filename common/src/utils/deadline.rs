use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Bounds an outbound I/O call. Expiry surfaces as a `Timeout` error
/// naming the operation, which callers propagate per the error policy.
pub async fn with_deadline<T, F>(what: &str, timeout: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{what} exceeded its {}s deadline",
            timeout.as_secs()
        ))),
    }
}
