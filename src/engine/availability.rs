use tracing::info;
use uuid::Uuid;

use crate::engine::Context;
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::store::WriteBatch;

pub async fn reconcile_driver_availability(
    ctx: &Context,
    driver_id: Uuid,
) -> Result<Option<Driver>, AppError> {
    ctx.live_driver(driver_id).await?;

    let committed = ctx
        .store
        .commit(WriteBatch::new().reconciling(driver_id))
        .await?;

    if let Some(driver) = &committed.released_driver {
        info!(driver_id = %driver.id, "driver available again");
    }

    Ok(committed.released_driver)
}
