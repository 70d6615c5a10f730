use crate::utils::error::{BloodSearchError, Result};
use std::future::Future;
use std::time::Duration;

/// Runs an external call under a deadline. An elapsed deadline becomes
/// [`BloodSearchError::Timeout`]; the call's own error passes through.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, seconds = limit.as_secs(), "External call timed out");
            Err(BloodSearchError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}
