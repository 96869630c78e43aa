//! sealbox-audit: hash-chained security log
//!
//! ```text
//! entry_hash_i = hex(SHA-256(canonical_json(payload_i) || prev_hash_i))
//! prev_hash_0  = GENESIS_HASH
//! prev_hash_i  = entry_hash_{i-1}
//! ```
//! Entries are never mutated after append and are signed with the actor's
//! RSA key. [`verify`] recomputes the whole chain; [`verify_stored`] also
//! checks signatures and undecodable positions. Both itemise every finding
//! by position.

pub mod entry;
pub mod verify;

pub use entry::{AuditAction, AuditEntry, AuditPayload, GENESIS_HASH};
pub use verify::{verify, verify_stored, AuditError, AuditTamperDetected, StoredEntry, VerifyReport};
