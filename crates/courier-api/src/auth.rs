use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};

use courier_crypto::CredentialVault;
use courier_db::Database;
use courier_gateway::SessionRegistry;
use courier_types::api::Claims;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub vault: Arc<CredentialVault>,
    pub registry: SessionRegistry,
    /// HMAC secret for operator tokens.
    pub api_secret: String,
}

/// Sign an operator token for `subject`, valid for `ttl`.
pub fn create_token(secret: &str, subject: &str, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: subject.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
