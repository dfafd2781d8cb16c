use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encryption,

    /// Tampering, wrong key, malformed or unsupported envelope.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Payload serialisation failed: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl CryptoError {
    pub(crate) fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption(reason.into())
    }
}
