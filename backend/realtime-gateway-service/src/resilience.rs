//! Per-call deadlines for downstream dependencies (provider API, store writes).
use crate::error::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Execute a fallible future with a deadline. `operation` names the call in the error.
pub async fn with_timeout<F, T>(duration: Duration, operation: &str, future: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{operation} exceeded {}ms",
            duration.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), "noop", async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapsed() {
        let result: AppResult<i32> = with_timeout(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(42)
        })
        .await;

        assert!(matches!(result, Err(AppError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: AppResult<i32> = with_timeout(Duration::from_secs(1), "failing", async {
            Err(AppError::ProviderCallFailed("boom".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::ProviderCallFailed(_))));
    }
}
