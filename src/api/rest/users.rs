use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;

use crate::engine::accounts::NewUser;
use crate::error::AppError;
use crate::models::user::User;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/users", post(register_user).get(list_users))
}

async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.accounts.register_user(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.accounts.list_users().await?))
}
