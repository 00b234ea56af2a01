use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::lifecycle::DashboardMetrics;
use crate::error::AppError;
use crate::models::parcel::{NewParcel, Parcel, ParcelStatus};
use crate::models::status_log::ParcelStatusLog;
use crate::notify::NotificationKind;
use crate::state::AppState;

const CALLER_HEADER: &str = "x-user-id";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/parcels", post(create_parcel).get(list_parcels))
        .route("/parcels/tracking/:tracking_id", get(get_parcel_by_tracking_id))
        .route("/parcels/:id", get(get_parcel))
        .route("/parcels/:id/history", get(status_history))
        .route("/parcels/:id/status", patch(update_status))
        .route("/parcels/:id/assign", post(assign_driver))
        .route("/parcels/:id/unassign", post(unassign_driver))
        .route("/parcels/:id/collect", post(collect_parcel))
        .route("/parcels/:id/notify", post(notify))
        .route("/dashboard", get(dashboard))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ParcelStatus,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct CollectRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct NotifyRequest {
    pub kind: NotificationKind,
}

fn caller_id(headers: &HeaderMap) -> Result<Option<Uuid>, AppError> {
    let Some(raw) = headers.get(CALLER_HEADER) else {
        return Ok(None);
    };

    let raw = raw
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("{CALLER_HEADER} is not valid text")))?;
    Uuid::parse_str(raw)
        .map(Some)
        .map_err(|err| AppError::BadRequest(format!("{CALLER_HEADER} is not a uuid: {err}")))
}

async fn create_parcel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NewParcel>,
) -> Result<(StatusCode, Json<Parcel>), AppError> {
    let caller = caller_id(&headers)?;
    let parcel = state.parcels.create_parcel(payload, caller).await?;

    Ok((StatusCode::CREATED, Json(parcel)))
}

async fn list_parcels(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Parcel>>, AppError> {
    Ok(Json(state.parcels.list_parcels().await?))
}

async fn get_parcel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(state.parcels.get_parcel(id).await?))
}

async fn get_parcel_by_tracking_id(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(state.parcels.get_parcel_by_tracking_id(&tracking_id).await?))
}

async fn status_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ParcelStatusLog>>, AppError> {
    Ok(Json(state.parcels.status_history(id).await?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(
        state
            .parcels
            .update_parcel_status_general(id, payload.status)
            .await?,
    ))
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(state.parcels.assign_driver(id, payload.driver_id).await?))
}

async fn unassign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(state.parcels.unassign_driver(id).await?))
}

async fn collect_parcel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CollectRequest>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(
        state
            .parcels
            .mark_parcel_collected_by_receiver(id, payload.user_id)
            .await?,
    ))
}

async fn notify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NotifyRequest>,
) -> Result<StatusCode, AppError> {
    state.parcels.notify(id, payload.kind).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn dashboard(State(state): State<Arc<AppState>>) -> Result<Json<DashboardMetrics>, AppError> {
    Ok(Json(state.parcels.get_dashboard_metrics().await?))
}
