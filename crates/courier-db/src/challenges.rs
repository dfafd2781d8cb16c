use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};

use crate::models::AuthChallenge;
use crate::{Database, OptionalExt, Result, from_sql_time, to_sql_time};

/// 32 bytes from the OS-seeded thread RNG, base64url without padding.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

impl Database {
    /// Store a one-time challenge binding a phone fingerprint to the
    /// provider's code handle. Returns the token handed to the client.
    pub fn create_auth_challenge(
        &self,
        phone_hash: &str,
        provider_code_handle: &str,
        ttl: Duration,
    ) -> Result<String> {
        let token = generate_token();
        let expires_at = to_sql_time(Utc::now() + ttl);

        self.with_tx("create_auth_challenge", |conn| {
            conn.execute(
                "INSERT INTO auth_challenges (token, phone_hash, provider_code_handle, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![token, phone_hash, provider_code_handle, expires_at],
            )?;
            Ok(())
        })?;

        Ok(token)
    }

    /// Flip `is_verified` exactly once, and only before expiry. A single
    /// conditional UPDATE makes check-and-set atomic, so a replayed token
    /// always gets `false`.
    pub fn consume_auth_challenge(&self, token: &str, user_remote_id: i64) -> Result<bool> {
        self.with_tx("consume_auth_challenge", |conn| {
            let changed = conn.execute(
                "UPDATE auth_challenges
                 SET is_verified = 1, verified_at = datetime('now'), user_remote_id = ?2
                 WHERE token = ?1 AND is_verified = 0 AND expires_at > datetime('now')",
                rusqlite::params![token, user_remote_id],
            )?;
            Ok(changed == 1)
        })
    }

    /// The challenge behind `token`, if it is still pending.
    pub fn get_auth_challenge(&self, token: &str) -> Result<Option<AuthChallenge>> {
        self.with_conn("get_auth_challenge", |conn| {
            conn.query_row(
                "SELECT token, phone_hash, provider_code_handle, created_at, expires_at, is_verified
                 FROM auth_challenges
                 WHERE token = ?1 AND is_verified = 0 AND expires_at > datetime('now')",
                [token],
                |row| {
                    Ok(AuthChallenge {
                        token: row.get(0)?,
                        phone_hash: row.get(1)?,
                        provider_code_handle: row.get(2)?,
                        created_at: from_sql_time(&row.get::<_, String>(3)?),
                        expires_at: from_sql_time(&row.get::<_, String>(4)?),
                        verified: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }
}
