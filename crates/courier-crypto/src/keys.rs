use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

/// PBKDF2 work factor. Brute-forcing the master secret from a leaked
/// envelope costs this many HMAC rounds per guess per user.
pub const KDF_ROUNDS: u32 = 100_000;

pub const SALT_LEN: usize = 16;

/// Stable per-user salt: the first 16 bytes of SHA-256 over the decimal id.
pub fn user_salt(user_id: i64) -> [u8; SALT_LEN] {
    let digest = Sha256::digest(user_id.to_string().as_bytes());
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&digest[..SALT_LEN]);
    salt
}

/// Derive the 256-bit AES key for one user from the master secret.
pub fn derive_user_key(master_secret: &[u8], user_id: i64) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(master_secret, &user_salt(user_id), KDF_ROUNDS, &mut key);
    key
}
