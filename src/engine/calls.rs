use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::error::AppError;

pub async fn critical<T, E, F>(what: &str, limit: Duration, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<AppError> + Display,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            warn!(call = what, error = %err, "critical dependency failed");
            Err(err.into())
        }
        Err(_) => {
            warn!(call = what, timeout_ms = limit.as_millis() as u64, "critical dependency timed out");
            Err(AppError::Internal(format!(
                "{what} timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}

pub async fn advisory<T, E, F>(what: &str, limit: Duration, call: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            warn!(call = what, error = %err, "advisory call failed; continuing");
            None
        }
        Err(_) => {
            warn!(call = what, timeout_ms = limit.as_millis() as u64, "advisory call timed out; continuing");
            None
        }
    }
}
