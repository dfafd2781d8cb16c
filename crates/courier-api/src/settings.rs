use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use courier_types::models::UserSettings;

use crate::auth::AppState;

pub async fn get_settings(
    State(state): State<AppState>,
    Path(remote_id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let settings = tokio::task::spawn_blocking(move || db.get_settings(remote_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("Loading settings for user {} failed: {}", remote_id, e); StatusCode::INTERNAL_SERVER_ERROR })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(settings))
}

/// Replace the whole settings document. Responds with the stored form,
/// keywords normalized.
pub async fn put_settings(
    State(state): State<AppState>,
    Path(remote_id): Path<i64>,
    Json(settings): Json<UserSettings>,
) -> Result<impl IntoResponse, StatusCode> {
    if settings.retention_days == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let stored = tokio::task::spawn_blocking(move || {
        if !db.update_settings(remote_id, &settings)? {
            return Ok(None);
        }
        db.get_settings(remote_id)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("Updating settings for user {} failed: {}", remote_id, e); StatusCode::INTERNAL_SERVER_ERROR })?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!("Settings updated for user {}", remote_id);
    Ok(Json(stored))
}
