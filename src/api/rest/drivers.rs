use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::drivers::{LocationUpdate, NewDriver};
use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus};
use crate::models::parcel::{Parcel, ParcelStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver).delete(delete_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/archive", post(archive_driver))
        .route("/drivers/:id/reconcile", post(reconcile_driver))
        .route("/drivers/:id/location", post(update_location))
        .route("/drivers/:id/parcels", get(list_driver_parcels))
        .route("/drivers/:id/parcels/:parcel_id/status", patch(update_parcel_status))
        .route("/drivers/:id/parcels/:parcel_id/pickup", post(mark_picked_up))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub parcel_id: Uuid,
    pub location: String,
}

#[derive(Deserialize)]
pub struct UpdateParcelStatusRequest {
    pub status: ParcelStatus,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewDriver>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    let driver = state.drivers.create_driver(payload).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.drivers.list_drivers().await?))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.get_driver(id).await?))
}

async fn delete_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.drivers.delete_driver(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.set_status(id, payload.status).await?))
}

async fn archive_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.archive_driver(id).await?))
}

async fn reconcile_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.reconcile(id).await?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<LocationUpdate>, AppError> {
    Ok(Json(
        state
            .drivers
            .update_location(id, payload.parcel_id, &payload.location)
            .await?,
    ))
}

async fn list_driver_parcels(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Parcel>>, AppError> {
    Ok(Json(state.drivers.list_driver_parcels(id).await?))
}

async fn update_parcel_status(
    State(state): State<Arc<AppState>>,
    Path((id, parcel_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateParcelStatusRequest>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(
        state
            .parcels
            .update_parcel_status(parcel_id, payload.status, id)
            .await?,
    ))
}

async fn mark_picked_up(
    State(state): State<Arc<AppState>>,
    Path((id, parcel_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(state.drivers.mark_parcel_picked_up(id, parcel_id).await?))
}
