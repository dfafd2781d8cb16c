use courier_crypto::CryptoError;
use courier_db::StoreError;
use thiserror::Error;

/// Failures reported by a transport connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote service rejected the credential. Never retried.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// The link is down. Supervision retries these.
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Why a session could not be started.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("User {0} not found or inactive")]
    UserNotFound(i64),

    #[error("User {0} has not consented to monitoring")]
    ConsentMissing(i64),

    #[error("Stored credential for user {user} is unreadable: {source}")]
    Decryption {
        user: i64,
        #[source]
        source: CryptoError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures that abort processing of a single event. Forward delivery
/// problems are not among them: the record is already committed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
