// Upper bound on how long a single storage call may take

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::types::{AppError, AppResult};

/// Await `fut`, or fail with a retryable [`AppError::Timeout`] once `limit` elapses.
/// Dropping the inner future on timeout cancels the in-flight call.
pub async fn with_deadline<T, F>(operation: &'static str, limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_secs = limit.as_secs(), "Storage call timed out");
            Err(AppError::Timeout { operation, after: limit })
        }
    }
}
