use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Profile, SessionState};

// -- JWT Claims --

/// Operator token claims for the operations API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Sessions --

/// Result of a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub remote_id: i64,
    pub state: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub remote_id: i64,
    pub outcome: StartOutcome,
}

// -- Auth challenges --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChallengeRequest {
    pub phone: String,
    pub provider_code_handle: String,
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChallengeResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// -- Enrollment --

/// Sent by the external authentication flow once the remote service has
/// accepted the login code.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollRequest {
    pub challenge_token: String,
    pub remote_id: i64,
    pub phone: String,
    pub credential: String,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub consent: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub user_id: i64,
    pub remote_id: i64,
    pub session_token: String,
    /// `None` when monitoring was not started (no consent recorded yet).
    pub monitoring: Option<StartOutcome>,
}

// -- Session tokens --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
}
