//! Chain tokens and the immutable entries they name

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use sealbox_core::Record;
use sealbox_crypto::encoding::base64_array;
use sealbox_crypto::{decrypt, encrypt, fill_random, CryptoError, Envelope, SearchKey};

use crate::error::{IndexError, IndexResult};

/// Size of a chain token in bytes (128-bit)
pub const TOKEN_SIZE: usize = 16;

/// A single-use random identifier for one chain entry. Independent of the
/// keyword and of every sibling token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(#[serde(with = "base64_array")] [u8; TOKEN_SIZE]);

impl Token {
    pub fn generate() -> IndexResult<Self> {
        let mut bytes = [0u8; TOKEN_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// URL-safe form, usable as a storage path segment.
    pub fn to_path_segment(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_path_segment(s: &str) -> IndexResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| IndexError::Lookup(format!("bad token {s:?}: {e}")))?;
        let arr: [u8; TOKEN_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IndexError::Lookup(format!("bad token length: {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_path_segment())
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({self})")
    }
}

/// One link of a keyword chain, as uploaded to and served by the server.
///
/// `value` is the file id sealed under Ks; `prev_token` is the keyword's
/// head at the moment this entry was created (`None` for the first entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub token: Token,
    pub value: Envelope,
    pub prev_token: Option<Token>,
}

impl Record for ChainEntry {
    const KIND: &'static str = "chain_entry";
}

impl ChainEntry {
    /// Create a fresh entry pointing at `prev`.
    pub fn seal(file_id: &str, search_key: &SearchKey, prev: Option<Token>) -> IndexResult<Self> {
        Ok(Self {
            token: Token::generate()?,
            value: encrypt(file_id.as_bytes(), search_key.as_bytes())?,
            prev_token: prev,
        })
    }

    /// Recover the file id this entry points at.
    pub fn open(value: &Envelope, search_key: &SearchKey) -> IndexResult<String> {
        let bytes = decrypt(value, search_key.as_bytes())?;
        String::from_utf8(bytes).map_err(|_| {
            IndexError::Crypto(CryptoError::InvalidFormat(
                "chain value is not a UTF-8 file id".into(),
            ))
        })
    }
}
