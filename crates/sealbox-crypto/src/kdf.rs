//! Key derivation: password → password key (Kp) via PBKDF2-HMAC-SHA256

use hmac::Hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{define_symmetric_key, fill_random};
use crate::{KEY_SIZE, SALT_SIZE};

define_symmetric_key!(
    /// The 256-bit key derived from the user's password. Only ever used to
    /// wrap or unwrap Km, Ks and the RSA private key; never persisted.
    PasswordKey
);

/// Generate a random 128-bit salt for a new registration.
pub fn generate_salt() -> CryptoResult<[u8; SALT_SIZE]> {
    let mut salt = [0u8; SALT_SIZE];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Derive Kp from a password and salt.
///
/// The salt is stored in the clear alongside the wrapped keys; it only has
/// to be unique per user.
pub fn derive_password_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    iterations: u32,
) -> CryptoResult<PasswordKey> {
    if iterations == 0 {
        return Err(CryptoError::InvalidKey(
            "PBKDF2 iteration count must be non-zero".into(),
        ));
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(
        password.expose_secret().as_bytes(),
        salt,
        iterations,
        &mut key,
    )
    .map_err(|e| CryptoError::InvalidKey(format!("PBKDF2 failed: {e}")))?;

    Ok(PasswordKey::from_bytes(key))
}
