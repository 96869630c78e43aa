use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Unlock failed. Covers both a wrong password and a tampered key bundle.
    #[error("wrong passphrase or corrupted key bundle")]
    WrongPassphrase,

    /// AES-GCM tag mismatch: wrong key, tampered ciphertext, tag, or IV.
    #[error("authentication failed: wrong key or tampered data")]
    Authentication,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// RSA-OAEP unwrap failure (mismatched recipient key or corrupted wrap).
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid encoding: {0}")]
    InvalidFormat(String),

    /// RSA-PSS signature did not verify under the given public key.
    #[error("signature verification failed")]
    InvalidSignature,

    #[error("key hierarchy is locked")]
    Locked,
}
