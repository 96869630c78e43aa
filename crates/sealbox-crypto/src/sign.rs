//! RSA-PSS(SHA-256) signatures with the user's own keypair.
//!
//! Used to sign audit entry hashes, so a log rewritten by whoever controls
//! storage no longer verifies against the owner's public key.

use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{PrivateKey, PublicKey};

pub fn sign(own: &PrivateKey, message: &[u8]) -> CryptoResult<Vec<u8>> {
    let signing_key = BlindedSigningKey::<Sha256>::new(own.inner().clone());
    let signature = signing_key
        .try_sign_with_rng(&mut rand::rngs::OsRng, message)
        .map_err(|e| CryptoError::InvalidKey(format!("RSA-PSS sign failed: {e}")))?;
    Ok(signature.to_vec())
}

/// Fails with [`CryptoError::InvalidSignature`] for a malformed signature,
/// a different signer, or a changed message.
pub fn verify_signature(signer: &PublicKey, message: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let verifying_key = VerifyingKey::<Sha256>::new(signer.inner().clone());
    let signature = Signature::try_from(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
