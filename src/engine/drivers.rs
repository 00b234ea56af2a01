use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::Context;
use crate::engine::availability::reconcile_driver_availability;
use crate::engine::calls::critical;
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::driver::{Driver, DriverStatus, VehicleMode};
use crate::models::parcel::{Parcel, ParcelStatus};
use crate::notify::NotificationKind;
use crate::store::WriteBatch;

pub const DELIVERY_RADIUS_KM: f64 = 0.3;

/// Absorbs floating point noise in the haversine result at the boundary.
const DISTANCE_TOLERANCE_KM: f64 = 1e-9;

#[derive(Debug, Clone, Deserialize)]
pub struct NewDriver {
    pub name: String,
    pub email: String,
    pub mode: VehicleMode,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LocationUpdate {
    pub status: Option<ParcelStatus>,
}

pub fn within_delivery_radius(distance_km: f64) -> bool {
    distance_km <= DELIVERY_RADIUS_KM + DISTANCE_TOLERANCE_KM
}

#[derive(Clone)]
pub struct DriverService {
    ctx: Context,
}

impl DriverService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn create_driver(&self, new_driver: NewDriver) -> Result<Driver, AppError> {
        if new_driver.name.trim().is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }
        if !new_driver.email.contains('@') {
            return Err(AppError::BadRequest("email is not valid".to_string()));
        }

        let driver = Driver::new(
            new_driver.name.trim().to_string(),
            new_driver.email.trim().to_string(),
            new_driver.mode,
            Utc::now(),
        );
        let driver = self.ctx.store.insert_driver(driver).await?;

        info!(driver_id = %driver.id, mode = ?driver.mode, "driver created");
        Ok(driver)
    }

    pub async fn list_drivers(&self) -> Result<Vec<Driver>, AppError> {
        let mut drivers = self.ctx.store.list_drivers().await?;
        drivers.sort_by_key(|driver| driver.created_at);
        Ok(drivers)
    }

    pub async fn get_driver(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        self.ctx
            .store
            .get_driver(driver_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))
    }

    pub async fn set_status(&self, driver_id: Uuid, status: DriverStatus) -> Result<Driver, AppError> {
        let mut driver = self.ctx.live_driver(driver_id).await?;
        let from = driver.status;

        driver.set_status(status, Utc::now());
        let committed = self.ctx.store.commit(WriteBatch::new().with_driver(driver)).await?;
        let driver = committed
            .driver
            .ok_or_else(|| AppError::Internal("driver commit returned no driver".to_string()))?;

        info!(%driver_id, from = ?from, to = ?status, "driver status changed");
        Ok(driver)
    }

    pub async fn archive_driver(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        let mut driver = self.ctx.live_driver(driver_id).await?;
        self.ensure_unencumbered(driver_id).await?;

        let now = Utc::now();
        driver.can_receive_assignments = false;
        driver.deleted_at = Some(now);
        driver.updated_at = now;

        let committed = self.ctx.store.commit(WriteBatch::new().with_driver(driver)).await?;
        let driver = committed
            .driver
            .ok_or_else(|| AppError::Internal("driver commit returned no driver".to_string()))?;

        info!(%driver_id, "driver archived");
        Ok(driver)
    }

    pub async fn delete_driver(&self, driver_id: Uuid) -> Result<(), AppError> {
        self.get_driver(driver_id).await?;
        self.ensure_unencumbered(driver_id).await?;

        if !self.ctx.store.delete_driver(driver_id).await? {
            return Err(AppError::NotFound(format!("driver {driver_id} not found")));
        }

        info!(%driver_id, "driver deleted");
        Ok(())
    }

    async fn ensure_unencumbered(&self, driver_id: Uuid) -> Result<(), AppError> {
        let holding = self
            .ctx
            .store
            .list_parcels_for_driver(driver_id)
            .await?
            .into_iter()
            .filter(|parcel| parcel.status == ParcelStatus::Assigned || parcel.status.is_active())
            .count();

        if holding > 0 {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} still holds {holding} open parcel(s)"
            )));
        }

        Ok(())
    }

    pub async fn reconcile(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        match reconcile_driver_availability(&self.ctx, driver_id).await? {
            Some(driver) => Ok(driver),
            None => self.get_driver(driver_id).await,
        }
    }

    pub async fn list_driver_parcels(&self, driver_id: Uuid) -> Result<Vec<Parcel>, AppError> {
        self.get_driver(driver_id).await?;

        let mut parcels = self.ctx.store.list_parcels_for_driver(driver_id).await?;
        parcels.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(parcels)
    }

    pub async fn update_location(
        &self,
        driver_id: Uuid,
        parcel_id: Uuid,
        location: &str,
    ) -> Result<LocationUpdate, AppError> {
        let started = Instant::now();
        let mut driver = self.ctx.live_driver(driver_id).await?;

        let point = critical(
            "geocode driver location",
            self.ctx.policy.geocode_timeout,
            self.ctx.geo.geocode(location),
        )
        .await?;

        let now = Utc::now();
        driver.current_point = Some(point);
        driver.current_location = Some(location.trim().to_string());
        driver.updated_at = now;
        self.ctx.store.commit(WriteBatch::new().with_driver(driver)).await?;

        let parcel = self
            .ctx
            .store
            .get_parcel(parcel_id)
            .await?
            .filter(|parcel| parcel.driver_id == Some(driver_id) && parcel.status.is_location_trackable());

        let Some(mut parcel) = parcel else {
            debug!(%driver_id, %parcel_id, "location recorded; no trackable parcel");
            return Ok(LocationUpdate { status: None });
        };

        let Some(destination) = parcel.destination_point else {
            debug!(%parcel_id, "location recorded; destination coordinates unknown");
            return Ok(LocationUpdate { status: None });
        };

        let distance_km = haversine_km(&point, &destination);
        let status = if within_delivery_radius(distance_km) {
            ParcelStatus::Delivered
        } else {
            ParcelStatus::InTransit
        };

        let log = parcel.apply_status(status, now);
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::new().with_parcel(parcel).with_log(log))
            .await?;
        let parcel = committed
            .parcel
            .ok_or_else(|| AppError::Internal("location commit returned no parcel".to_string()))?;

        info!(
            %driver_id,
            %parcel_id,
            distance_km,
            status = status.as_str(),
            "location update applied"
        );
        self.ctx.publish(&parcel);

        self.ctx
            .notify_best_effort(
                NotificationKind::LocationUpdate,
                self.ctx
                    .notifier
                    .send_location_update_notification(&parcel, location.trim()),
            )
            .await;
        if status == ParcelStatus::Delivered {
            self.ctx
                .notify_best_effort(
                    NotificationKind::Delivery,
                    self.ctx.notifier.send_delivery_notification(&parcel),
                )
                .await;
        }
        self.ctx.observe("update_location", started);

        Ok(LocationUpdate {
            status: Some(status),
        })
    }

    /// Only the assigned driver may pick up, and only an ASSIGNED parcel.
    /// Repeating the call after pickup is a no-op.
    pub async fn mark_parcel_picked_up(&self, driver_id: Uuid, parcel_id: Uuid) -> Result<Parcel, AppError> {
        let mut parcel = self.ctx.parcel(parcel_id).await?;

        if parcel.driver_id != Some(driver_id) {
            return Err(AppError::BadRequest(format!(
                "driver {driver_id} is not assigned to parcel {parcel_id}"
            )));
        }

        match parcel.status {
            ParcelStatus::Assigned => {}
            ParcelStatus::PickedUpByDriver => return Ok(parcel),
            other => {
                return Err(AppError::Conflict(format!(
                    "parcel {parcel_id} is {} and cannot be picked up",
                    other.as_str()
                )));
            }
        }

        let log = parcel.apply_status(ParcelStatus::PickedUpByDriver, Utc::now());
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::new().with_parcel(parcel).with_log(log))
            .await?;
        let parcel = committed
            .parcel
            .ok_or_else(|| AppError::Internal("pickup commit returned no parcel".to_string()))?;

        info!(%driver_id, %parcel_id, "parcel picked up");
        self.ctx.publish(&parcel);

        Ok(parcel)
    }
}
