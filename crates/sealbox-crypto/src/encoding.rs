//! Base64 helpers for persisted binary fields (standard alphabet, padded).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| CryptoError::InvalidFormat(format!("base64 decode: {e}")))
}

/// Decode into a fixed-size array, rejecting any other length.
pub fn b64_decode_array<const N: usize>(s: &str) -> CryptoResult<[u8; N]> {
    let bytes = b64_decode(s)?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidFormat(format!("expected {N} bytes, got {}", bytes.len()))
    })
}

/// `#[serde(with = "base64_bytes")]` for `Vec<u8>` fields.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::b64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        super::b64_decode(&s).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "base64_array")]` for `[u8; N]` fields.
pub mod base64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::b64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        super::b64_decode_array::<N>(&s).map_err(serde::de::Error::custom)
    }
}
