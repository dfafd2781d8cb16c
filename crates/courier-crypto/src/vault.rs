use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::{
    Aes256Gcm, Key, KeyInit,
    aead::{OsRng, rand_core::RngCore},
};

use crate::envelope::{self, Payload};
use crate::error::CryptoError;
use crate::keys::derive_user_key;

/// Per-user encryption of session credentials and session tokens.
///
/// Derived ciphers are cached for the lifetime of the process; the master
/// secret is the security boundary, not the cache.
pub struct CredentialVault {
    master_secret: Vec<u8>,
    ciphers: Mutex<HashMap<i64, Arc<Aes256Gcm>>>,
}

impl CredentialVault {
    pub fn new(master_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            master_secret: master_secret.into(),
            ciphers: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministically derive the raw key for `user_id`. Uncached.
    pub fn derive_key(&self, user_id: i64) -> [u8; 32] {
        derive_user_key(&self.master_secret, user_id)
    }

    fn cipher_for(&self, user_id: i64) -> Arc<Aes256Gcm> {
        if let Some(cipher) = self.lock_cache().get(&user_id) {
            return cipher.clone();
        }

        // Derive outside the lock; PBKDF2 is deliberately slow and must not
        // stall lookups for other users.
        let key = self.derive_key(user_id);
        let cipher = Arc::new(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)));

        self.lock_cache().entry(user_id).or_insert(cipher).clone()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Arc<Aes256Gcm>>> {
        // A poisoned cache only ever holds fully constructed ciphers.
        self.ciphers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of users with a cached cipher.
    pub fn cached_users(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn encrypt(&self, user_id: i64, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt_payload(user_id, &Payload::Text(plaintext.to_string()))
    }

    pub fn encrypt_payload(&self, user_id: i64, payload: &Payload) -> Result<String, CryptoError> {
        envelope::seal(&self.cipher_for(user_id), payload)
    }

    /// Decrypt a text envelope. Any other payload kind is a decryption error.
    pub fn decrypt(&self, user_id: i64, ciphertext: &str) -> Result<String, CryptoError> {
        match self.decrypt_payload(user_id, ciphertext)? {
            Payload::Text(text) => Ok(text),
            _ => Err(CryptoError::Decryption("expected a text payload".into())),
        }
    }

    pub fn decrypt_payload(&self, user_id: i64, ciphertext: &str) -> Result<Payload, CryptoError> {
        envelope::open(&self.cipher_for(user_id), ciphertext)
    }

    /// Issue an opaque token wrapping `user_id:nonce:issued_at`.
    pub fn issue_session_token(&self, user_id: i64) -> Result<String, CryptoError> {
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);

        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let raw = format!("{}:{}:{}", user_id, hex::encode(nonce), issued_at);
        self.encrypt(user_id, &raw)
    }

    /// Never fails: any decoding problem means "not valid".
    pub fn verify_session_token(&self, token: &str, user_id: i64) -> bool {
        let Ok(raw) = self.decrypt(user_id, token) else {
            return false;
        };

        let parts: Vec<&str> = raw.split(':').collect();
        parts.len() == 3 && parts[0].parse::<i64>().ok() == Some(user_id)
    }
}
