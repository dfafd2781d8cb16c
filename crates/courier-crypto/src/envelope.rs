//! Versioned credential envelope.
//!
//! Layout before base64url encoding:
//!
//! ```text
//! | version (1) | kind (1) | nonce (12) | AES-256-GCM ciphertext + tag |
//! ```
//!
//! The two header bytes are authenticated as associated data, so flipping
//! the kind tag is detected exactly like flipping a ciphertext byte. The
//! kind tag decides how the plaintext is interpreted; there is no guessing.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, OsRng, Payload as AeadPayload, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as B64};

use crate::error::CryptoError;

pub const ENVELOPE_VERSION: u8 = 1;

const HEADER_LEN: usize = 2;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const KIND_TEXT: u8 = 1;
const KIND_JSON: u8 = 2;
const KIND_BYTES: u8 = 3;

/// Plaintext carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Payload {
    fn kind(&self) -> u8 {
        match self {
            Self::Text(_) => KIND_TEXT,
            Self::Json(_) => KIND_JSON,
            Self::Bytes(_) => KIND_BYTES,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(match self {
            Self::Text(text) => text.as_bytes().to_vec(),
            Self::Json(value) => serde_json::to_vec(value)?,
            Self::Bytes(bytes) => bytes.clone(),
        })
    }

    fn from_bytes(kind: u8, bytes: Vec<u8>) -> Result<Self, CryptoError> {
        match kind {
            KIND_TEXT => String::from_utf8(bytes)
                .map(Self::Text)
                .map_err(|_| CryptoError::decryption("text payload is not valid UTF-8")),
            KIND_JSON => serde_json::from_slice(&bytes)
                .map(Self::Json)
                .map_err(|_| CryptoError::decryption("json payload is not valid JSON")),
            KIND_BYTES => Ok(Self::Bytes(bytes)),
            other => Err(CryptoError::decryption(format!("unknown payload kind {}", other))),
        }
    }
}

/// Encrypt `payload` into a base64url envelope string.
pub fn seal(cipher: &Aes256Gcm, payload: &Payload) -> Result<String, CryptoError> {
    let header = [ENVELOPE_VERSION, payload.kind()];
    let plaintext = payload.to_bytes()?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, AeadPayload { msg: &plaintext, aad: &header })
        .map_err(|_| CryptoError::Encryption)?;

    let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);

    Ok(B64.encode(out))
}

/// Decrypt a base64url envelope produced by [`seal`].
pub fn open(cipher: &Aes256Gcm, envelope: &str) -> Result<Payload, CryptoError> {
    let raw = B64
        .decode(envelope.trim())
        .map_err(|_| CryptoError::decryption("envelope is not base64url"))?;

    if raw.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::decryption("envelope too short"));
    }

    let (header, rest) = raw.split_at(HEADER_LEN);
    if header[0] != ENVELOPE_VERSION {
        return Err(CryptoError::decryption(format!(
            "unsupported envelope version {}",
            header[0]
        )));
    }

    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            AeadPayload { msg: ciphertext, aad: header },
        )
        .map_err(|_| CryptoError::decryption("authentication tag mismatch"))?;

    Payload::from_bytes(header[1], plaintext)
}
