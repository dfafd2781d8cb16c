/// Courier Crypto Library
///
/// Per-user symmetric protection for the long-lived session credential:
/// - keys: PBKDF2-HMAC-SHA256 derivation from the process master secret
/// - envelope: versioned, self-describing AES-256-GCM envelope
/// - vault: cached per-user ciphers plus session token issue/verify

pub mod envelope;
pub mod error;
pub mod keys;
pub mod vault;

pub use envelope::Payload;
pub use error::CryptoError;
pub use vault::CredentialVault;
