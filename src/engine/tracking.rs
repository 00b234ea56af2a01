use tracing::{debug, error};

use crate::error::AppError;
use crate::store::ParcelStore;

pub const TRACKING_PREFIX: &str = "PKG-";

pub const MAX_ATTEMPTS: usize = 8;

pub async fn generate_unique_tracking_id(store: &dyn ParcelStore) -> Result<String, AppError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let sequence = store.next_tracking_sequence().await.map_err(|err| {
            error!(error = %err, "tracking sequence unavailable");
            AppError::Internal(format!("tracking id generation failed: {err}"))
        })?;
        let candidate = format!("{TRACKING_PREFIX}{sequence}");

        let taken = store.tracking_id_exists(&candidate).await.map_err(|err| {
            error!(error = %err, candidate, "tracking id probe failed");
            AppError::Internal(format!("tracking id generation failed: {err}"))
        })?;

        if !taken {
            return Ok(candidate);
        }

        debug!(candidate, attempt, "tracking id already in use");
    }

    Err(AppError::Internal(format!(
        "tracking id generation exhausted after {MAX_ATTEMPTS} attempts"
    )))
}
