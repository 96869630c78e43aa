//! AES-256-GCM envelope cipher: the only gateway to symmetric encryption.
//!
//! Persisted format:
//! ```text
//! ciphertext = base64(AES-GCM output: ciphertext || 16-byte tag)
//! iv         = base64(12 random bytes)
//! ```
//!
//! The IV is always drawn from the OS CSPRNG inside [`encrypt`]; callers
//! cannot supply one.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};

use crate::encoding::{base64_array, base64_bytes};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::fill_random;
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// A sealed payload: AES-GCM ciphertext (with tag) plus its IV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_array")]
    pub iv: [u8; IV_SIZE],
}

impl Envelope {
    /// Length of the plaintext this envelope decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> CryptoResult<Envelope> {
    let cipher = Aes256Gcm::new(key.into());

    let mut iv = [0u8; IV_SIZE];
    fill_random(&mut iv)?;
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::InvalidFormat(format!("envelope encryption failed: {e}")))?;

    Ok(Envelope { ciphertext, iv })
}

/// Decrypt an envelope. Any tag mismatch yields [`CryptoError::Authentication`]
/// and no plaintext.
pub fn decrypt(envelope: &Envelope, key: &[u8; KEY_SIZE]) -> CryptoResult<Vec<u8>> {
    if envelope.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Authentication);
    }

    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(&envelope.iv);

    cipher
        .decrypt(nonce, envelope.ciphertext.as_ref())
        .map_err(|_| CryptoError::Authentication)
}
