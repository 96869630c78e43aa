//! Key types: symmetric 256-bit keys (Km, Ks, Kf) and the RSA keypair

use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::encoding::{b64_decode, b64_encode};
use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// Declares a 256-bit symmetric key newtype. Zeroized on drop, redacted in
/// `Debug`, never `Serialize`.
macro_rules! define_symmetric_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            bytes: [u8; $crate::KEY_SIZE],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; $crate::KEY_SIZE]) -> Self {
                Self { bytes }
            }

            pub fn as_bytes(&self) -> &[u8; $crate::KEY_SIZE] {
                &self.bytes
            }

            /// Build from a byte slice, rejecting anything that is not exactly 256 bits.
            pub fn from_slice(bytes: &[u8]) -> $crate::error::CryptoResult<Self> {
                let arr: [u8; $crate::KEY_SIZE] = bytes.try_into().map_err(|_| {
                    $crate::error::CryptoError::InvalidKey(format!(
                        "{}: expected {} bytes, got {}",
                        stringify!($name),
                        $crate::KEY_SIZE,
                        bytes.len()
                    ))
                })?;
                Ok(Self::from_bytes(arr))
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                zeroize::Zeroize::zeroize(&mut self.bytes);
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

pub(crate) use define_symmetric_key;

define_symmetric_key!(
    /// Km: wraps every file key the user owns and the index-state blob.
    MasterKey
);

define_symmetric_key!(
    /// Ks: encrypts the file-id pointers stored as keyword chain values.
    SearchKey
);

define_symmetric_key!(
    /// Kf: per-file key for content and metadata. Generated once at upload.
    FileKey
);

/// Fill `buf` from the OS CSPRNG, surfacing RNG failure instead of panicking.
pub fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    rand::rngs::OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::KeyGeneration(format!("OS RNG unavailable: {e}")))
}

fn random_key_bytes() -> CryptoResult<[u8; KEY_SIZE]> {
    let mut bytes = [0u8; KEY_SIZE];
    fill_random(&mut bytes)?;
    Ok(bytes)
}

impl MasterKey {
    pub fn generate() -> CryptoResult<Self> {
        random_key_bytes().map(Self::from_bytes)
    }
}

impl SearchKey {
    pub fn generate() -> CryptoResult<Self> {
        random_key_bytes().map(Self::from_bytes)
    }
}

impl FileKey {
    pub fn generate() -> CryptoResult<Self> {
        random_key_bytes().map(Self::from_bytes)
    }
}

/// An RSA-OAEP public key, persisted as base64 SPKI DER.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    pub fn inner(&self) -> &RsaPublicKey {
        &self.0
    }

    pub fn to_spki_der(&self) -> CryptoResult<Vec<u8>> {
        let doc = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(format!("SPKI encode: {e}")))?;
        Ok(doc.as_bytes().to_vec())
    }

    pub fn from_spki_der(der: &[u8]) -> CryptoResult<Self> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(format!("SPKI decode: {e}")))
    }

    pub fn to_b64(&self) -> CryptoResult<String> {
        Ok(b64_encode(&self.to_spki_der()?))
    }

    pub fn from_b64(s: &str) -> CryptoResult<Self> {
        Self::from_spki_der(&b64_decode(s)?)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use rsa::traits::PublicKeyParts;
        f.debug_struct("PublicKey")
            .field("bits", &(self.0.size() * 8))
            .finish()
    }
}

/// An RSA-OAEP private key. The inner key zeroizes itself on drop.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    pub fn inner(&self) -> &RsaPrivateKey {
        &self.0
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    /// PKCS8 DER encoding. The buffer is wiped when dropped.
    pub fn to_pkcs8_der(&self) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let doc = self
            .0
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKey(format!("PKCS8 encode: {e}")))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    pub fn from_pkcs8_der(der: &[u8]) -> CryptoResult<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(format!("PKCS8 decode: {e}")))
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Generate an RSA keypair with public exponent 65537.
pub fn generate_keypair(bits: usize) -> CryptoResult<PrivateKey> {
    let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
        .map_err(|e| CryptoError::KeyGeneration(format!("RSA-{bits}: {e}")))?;
    Ok(PrivateKey(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_generation() {
        let k1 = FileKey::generate().unwrap();
        let k2 = FileKey::generate().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_from_slice_length_checked() {
        assert!(MasterKey::from_slice(&[0u8; 31]).is_err());
        assert!(MasterKey::from_slice(&[0u8; 33]).is_err());
        let key = MasterKey::from_slice(&[9u8; KEY_SIZE]).unwrap();
        assert_eq!(key.as_bytes(), &[9u8; KEY_SIZE]);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SearchKey::from_bytes([0xAB; KEY_SIZE]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"), "raw bytes must not leak");
    }

    #[test]
    fn test_rsa_der_roundtrip() {
        let private = generate_keypair(2048).unwrap();
        let public = private.public_key();

        let restored_pub = PublicKey::from_b64(&public.to_b64().unwrap()).unwrap();
        assert_eq!(restored_pub, public);

        let der = private.to_pkcs8_der().unwrap();
        let restored_priv = PrivateKey::from_pkcs8_der(&der).unwrap();
        assert_eq!(restored_priv, private);
    }

    #[test]
    fn test_spki_garbage_rejected() {
        assert!(matches!(
            PublicKey::from_spki_der(b"definitely not DER"),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
