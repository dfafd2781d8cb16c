use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};

use courier_gateway::{GatewayError, TransportError};
use courier_types::api::{SessionView, StartOutcome, StartResponse};

use crate::auth::AppState;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let stats = tokio::task::spawn_blocking(move || db.statistics())
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("Statistics query failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(stats))
}

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.sessions().await)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(remote_id): Path<i64>,
) -> impl IntoResponse {
    Json(SessionView {
        remote_id,
        state: state.registry.state(remote_id).await,
    })
}

pub async fn start_session(
    State(state): State<AppState>,
    Path(remote_id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    let outcome = state
        .registry
        .start(remote_id)
        .await
        .map_err(|e| start_error_status(remote_id, &e))?;

    let status = match outcome {
        StartOutcome::Started => StatusCode::CREATED,
        StartOutcome::AlreadyRunning => StatusCode::OK,
    };

    Ok((status, Json(StartResponse { remote_id, outcome })))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(remote_id): Path<i64>,
) -> StatusCode {
    state.registry.stop(remote_id).await;
    StatusCode::NO_CONTENT
}

pub(crate) fn start_error_status(remote_id: i64, err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UserNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::ConsentMissing(_) => StatusCode::CONFLICT,
        GatewayError::Transport(TransportError::Auth(reason)) => {
            warn!("Remote service rejected credential for user {}: {}", remote_id, reason);
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GatewayError::Transport(e) => {
            warn!("Transport unavailable for user {}: {}", remote_id, e);
            StatusCode::BAD_GATEWAY
        }
        GatewayError::Decryption { .. } | GatewayError::Store(_) | GatewayError::Join(_) => {
            error!("Starting session for user {} failed: {}", remote_id, err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
