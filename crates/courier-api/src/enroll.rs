use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Duration;
use tracing::{error, info, warn};

use courier_db::users::{hash_phone, mask_phone};
use courier_types::api::{
    CreateChallengeRequest, CreateChallengeResponse, EnrollRequest, EnrollResponse,
    VerifyTokenRequest, VerifyTokenResponse,
};

use crate::auth::AppState;

const DEFAULT_CHALLENGE_TTL_MINUTES: i64 = 10;
const MAX_CHALLENGE_TTL_MINUTES: i64 = 60;

pub async fn create_challenge(
    State(state): State<AppState>,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.phone.trim().is_empty() || req.provider_code_handle.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let ttl_minutes = req.ttl_minutes.unwrap_or(DEFAULT_CHALLENGE_TTL_MINUTES);
    if !(1..=MAX_CHALLENGE_TTL_MINUTES).contains(&ttl_minutes) {
        return Err(StatusCode::BAD_REQUEST);
    }

    // The phone itself is never stored, only its fingerprint.
    let phone_hash = hash_phone(req.phone.trim());
    let masked = mask_phone(req.phone.trim());

    let db = state.db.clone();
    let challenge = tokio::task::spawn_blocking(move || {
        let token = db.create_auth_challenge(
            &phone_hash,
            &req.provider_code_handle,
            Duration::minutes(ttl_minutes),
        )?;
        db.get_auth_challenge(&token)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("Creating auth challenge failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("Auth challenge issued for {}", masked);

    Ok((
        StatusCode::CREATED,
        Json(CreateChallengeResponse {
            token: challenge.token,
            expires_at: challenge.expires_at,
        }),
    ))
}

/// Complete enrollment after the external login flow succeeded: burn the
/// challenge, seal the credential, store the user and, once consent is on
/// record, (re)start monitoring with the new credential.
///
/// A failed start does not undo the enrollment; it is reported as
/// `monitoring: null` and can be retried through `POST /sessions/{id}`.
pub async fn enroll(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.credential.is_empty() || req.phone.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let remote_id = req.remote_id;
    let db = state.db.clone();
    let vault = state.vault.clone();

    let (user_id, consented, session_token) = tokio::task::spawn_blocking(move || {
        let phone = req.phone.trim();

        let challenge = db
            .get_auth_challenge(&req.challenge_token)
            .map_err(|e| { error!("Challenge lookup failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if challenge.phone_hash != hash_phone(phone) {
            warn!("Enrollment phone mismatch for user {}", remote_id);
            return Err(StatusCode::FORBIDDEN);
        }

        // Lost the race against a concurrent enrollment with the same token.
        let consumed = db
            .consume_auth_challenge(&req.challenge_token, remote_id)
            .map_err(|e| { error!("Consuming challenge failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;
        if !consumed {
            return Err(StatusCode::UNAUTHORIZED);
        }

        let sealed = vault
            .encrypt(remote_id, &req.credential)
            .map_err(|e| { error!("Sealing credential for user {} failed: {}", remote_id, e); StatusCode::INTERNAL_SERVER_ERROR })?;

        let user_id = db
            .upsert_user(remote_id, phone, &sealed, &req.profile)
            .map_err(|e| { error!("Storing user {} failed: {}", remote_id, e); StatusCode::INTERNAL_SERVER_ERROR })?;

        if req.consent {
            db.record_consent(remote_id)
                .map_err(|e| { error!("Recording consent for user {} failed: {}", remote_id, e); StatusCode::INTERNAL_SERVER_ERROR })?;
        }

        let consented = db
            .get_user_by_remote_id(remote_id)
            .map_err(|e| { error!("Reloading user {} failed: {}", remote_id, e); StatusCode::INTERNAL_SERVER_ERROR })?
            .is_some_and(|user| user.consent);

        let session_token = vault
            .issue_session_token(remote_id)
            .map_err(|e| { error!("Issuing session token for user {} failed: {}", remote_id, e); StatusCode::INTERNAL_SERVER_ERROR })?;

        Ok::<_, StatusCode>((user_id, consented, session_token))
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    info!("User {} enrolled", remote_id);

    let monitoring = if consented {
        // A session still holding the previous credential must not survive.
        state.registry.stop(remote_id).await;
        match state.registry.start(remote_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Monitoring for user {} not started after enrollment: {}", remote_id, e);
                None
            }
        }
    } else {
        None
    };

    Ok((
        StatusCode::CREATED,
        Json(EnrollResponse {
            user_id,
            remote_id,
            session_token,
            monitoring,
        }),
    ))
}

pub async fn verify_token(
    State(state): State<AppState>,
    Path(remote_id): Path<i64>,
    Json(req): Json<VerifyTokenRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let vault = state.vault.clone();
    let valid = tokio::task::spawn_blocking(move || vault.verify_session_token(&req.token, remote_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(VerifyTokenResponse { valid }))
}
