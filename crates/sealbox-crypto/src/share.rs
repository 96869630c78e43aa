//! RSA-OAEP(SHA-256) wrapping of file keys for recipients.
//!
//! Sharing hands the recipient the raw Kf wrapped under their public key.
//! Revocation happens at the storage layer and does not re-key the file: a
//! recipient who already unwrapped Kf keeps the ability to decrypt it.

use rsa::Oaep;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{FileKey, PrivateKey, PublicKey};

/// Wrap `file_key` for `recipient`. The caller must already hold Kf.
pub fn share_file_key(recipient: &PublicKey, file_key: &FileKey) -> CryptoResult<Vec<u8>> {
    recipient
        .inner()
        .encrypt(
            &mut rand::rngs::OsRng,
            Oaep::new::<Sha256>(),
            file_key.as_bytes(),
        )
        .map_err(|e| CryptoError::InvalidKey(format!("RSA-OAEP wrap failed: {e}")))
}

/// Unwrap a shared file key with the recipient's own private key.
pub fn accept_share(wrapped: &[u8], own: &PrivateKey) -> CryptoResult<FileKey> {
    let plaintext = Zeroizing::new(own.inner().decrypt(Oaep::new::<Sha256>(), wrapped).map_err(
        |_| CryptoError::Decryption("RSA-OAEP unwrap failed: key mismatch or corrupted share".into()),
    )?);

    FileKey::from_slice(&plaintext)
        .map_err(|_| CryptoError::Decryption("unwrapped share is not a 256-bit key".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;

    #[test]
    fn test_share_accept_roundtrip() {
        let bob = generate_keypair(2048).unwrap();
        let file_key = FileKey::generate().unwrap();

        let wrapped = share_file_key(&bob.public_key(), &file_key).unwrap();
        let recovered = accept_share(&wrapped, &bob).unwrap();

        assert_eq!(recovered.as_bytes(), file_key.as_bytes());
    }

    #[test]
    fn test_accept_with_wrong_private_key() {
        let bob = generate_keypair(2048).unwrap();
        let eve = generate_keypair(2048).unwrap();
        let file_key = FileKey::generate().unwrap();

        let wrapped = share_file_key(&bob.public_key(), &file_key).unwrap();
        let result = accept_share(&wrapped, &eve);

        assert!(matches!(result, Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_accept_corrupted_share() {
        let bob = generate_keypair(2048).unwrap();
        let mut wrapped = share_file_key(&bob.public_key(), &FileKey::generate().unwrap()).unwrap();
        wrapped[10] ^= 0x01;

        assert!(matches!(
            accept_share(&wrapped, &bob),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_oaep_is_randomized() {
        let bob = generate_keypair(2048).unwrap();
        let file_key = FileKey::generate().unwrap();

        let a = share_file_key(&bob.public_key(), &file_key).unwrap();
        let b = share_file_key(&bob.public_key(), &file_key).unwrap();
        assert_ne!(a, b);
    }
}
