//! Versioned, tagged record schemas for everything the storage collaborator
//! persists.
//!
//! Wire form:
//! ```text
//! {"kind": "<kind>", "version": <u32>, "body": { ...record fields... }}
//! ```
//! Decoding checks kind and version before touching the body, so envelope
//! format compatibility can be tested without any application logic.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sealbox_crypto::encoding::base64_bytes;
use sealbox_crypto::{Envelope, UserKeyBundle};

use crate::error::{SealboxError, SealboxResult};

/// A persisted record type with a stable kind tag and schema version.
pub trait Record: Serialize + DeserializeOwned {
    const KIND: &'static str;
    const VERSION: u32 = 1;
}

#[derive(Serialize)]
struct TaggedRef<'a, T> {
    kind: &'a str,
    version: u32,
    body: &'a T,
}

#[derive(Deserialize)]
struct Tagged {
    kind: String,
    version: u32,
    body: serde_json::Value,
}

/// Serialize a record inside its tagged wrapper.
pub fn encode<T: Record>(record: &T) -> SealboxResult<Vec<u8>> {
    let tagged = TaggedRef {
        kind: T::KIND,
        version: T::VERSION,
        body: record,
    };
    Ok(serde_json::to_vec(&tagged)?)
}

/// Deserialize a record, rejecting a foreign kind or an unknown version.
pub fn decode<T: Record>(bytes: &[u8]) -> SealboxResult<T> {
    let tagged: Tagged = serde_json::from_slice(bytes)
        .map_err(|e| SealboxError::Record(format!("not a tagged record: {e}")))?;

    if tagged.kind != T::KIND || tagged.version != T::VERSION {
        return Err(SealboxError::UnsupportedRecord {
            kind: tagged.kind,
            version: tagged.version,
        });
    }

    serde_json::from_value(tagged.body)
        .map_err(|e| SealboxError::Record(format!("{} v{}: {e}", T::KIND, T::VERSION)))
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A registered user: name plus the wrapped key bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub keys: UserKeyBundle,
    pub created_at: u64,
}

impl Record for UserRecord {
    const KIND: &'static str = "user";
}

/// Access level granted by a share.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    Read,
    ReadWrite,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Read => f.write_str("read"),
            Permission::ReadWrite => f.write_str("read_write"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = SealboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "read_write" | "read-write" => Ok(Permission::ReadWrite),
            other => Err(SealboxError::Record(format!("unknown permission: {other}"))),
        }
    }
}

/// How the viewer of a file obtains Kf. Exactly one path applies per view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum KeyGrant {
    /// Kf wrapped under the owner's Km.
    Owner { wrapped: Envelope },
    /// Kf wrapped under the recipient's RSA public key.
    Shared {
        recipient: String,
        #[serde(with = "base64_bytes")]
        wrapped: Vec<u8>,
        permission: Permission,
    },
}

/// An uploaded file. Metadata and content are sealed under Kf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub owner: String,
    pub metadata: Envelope,
    pub content: Envelope,
    pub key: KeyGrant,
    pub created_at: u64,
    #[serde(default)]
    pub trashed: bool,
}

impl Record for FileRecord {
    const KIND: &'static str = "file";
}

/// Plaintext file metadata; only ever stored sealed under Kf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Record for FileMetadata {
    const KIND: &'static str = "file_metadata";
}

/// A server-side share grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub file_id: String,
    pub owner: String,
    pub recipient: String,
    /// Kf under the recipient's RSA public key (RSA-OAEP/SHA-256)
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
    pub permission: Permission,
    pub created_at: u64,
}

impl Record for ShareRecord {
    const KIND: &'static str = "share";
}

/// The encrypted client chain state, one blob per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStateRecord {
    pub owner: String,
    /// Bumped on every persist; used to detect unsynchronized writers.
    pub generation: u64,
    pub state: Envelope,
    pub updated_at: u64,
}

impl Record for IndexStateRecord {
    const KIND: &'static str = "index_state";
}
