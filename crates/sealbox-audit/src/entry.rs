use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sealbox_core::{unix_now, Record};
use sealbox_crypto::encoding::{b64_decode, b64_encode};
use sealbox_crypto::{CryptoError, CryptoResult, PrivateKey, PublicKey};

/// `prev_hash` of the first entry in every log: 32 zero bytes, hex encoded.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Security-relevant actions recorded in a user's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Register,
    UnlockFailed,
    Upload,
    Share,
    Revoke,
    Trash,
    Restore,
    Purge,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::Register => "register",
            AuditAction::UnlockFailed => "unlock_failed",
            AuditAction::Upload => "upload",
            AuditAction::Share => "share",
            AuditAction::Revoke => "revoke",
            AuditAction::Trash => "trash",
            AuditAction::Restore => "restore",
            AuditAction::Purge => "purge",
        };
        f.write_str(s)
    }
}

/// The hashed part of an entry.
///
/// Fields are declared in key order and `context` is a `BTreeMap`, so the
/// serde_json encoding is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPayload {
    pub action: AuditAction,
    pub actor: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub timestamp: u64,
}

impl AuditPayload {
    pub fn new(actor: &str, action: AuditAction) -> Self {
        Self {
            action,
            actor: actor.to_string(),
            context: BTreeMap::new(),
            timestamp: unix_now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// `hex(SHA-256(canonical_json || prev_hash))`
    pub fn chain_hash(&self, prev_hash: &str) -> serde_json::Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes()?);
        hasher.update(prev_hash.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub payload: AuditPayload,
    pub entry_hash: String,
    pub prev_hash: String,
    pub created_at: u64,
    /// base64 RSA-PSS signature over `entry_hash` by the actor's key.
    /// Absent only for entries written without an unlocked key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Record for AuditEntry {
    const KIND: &'static str = "audit_entry";
}

impl AuditEntry {
    /// Build the entry that follows `last` (or starts the log when `None`).
    pub fn append(last: Option<&AuditEntry>, payload: AuditPayload) -> serde_json::Result<Self> {
        let prev_hash = last.map_or(GENESIS_HASH, |e| e.entry_hash.as_str()).to_string();
        let entry_hash = payload.chain_hash(&prev_hash)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: payload.timestamp,
            payload,
            entry_hash,
            prev_hash,
            signature: None,
        })
    }

    pub fn sign(&mut self, key: &PrivateKey) -> CryptoResult<()> {
        let signature = sealbox_crypto::sign(key, self.entry_hash.as_bytes())?;
        self.signature = Some(b64_encode(&signature));
        Ok(())
    }

    /// Check the stored signature against `signer`. An unsigned entry
    /// fails with `InvalidSignature` as well.
    pub fn verify_signature(&self, signer: &PublicKey) -> CryptoResult<()> {
        let encoded = self
            .signature
            .as_deref()
            .ok_or(CryptoError::InvalidSignature)?;
        sealbox_crypto::verify_signature(signer, self.entry_hash.as_bytes(), &b64_decode(encoded)?)
    }
}
