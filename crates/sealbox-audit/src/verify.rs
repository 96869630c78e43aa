//! Audit chain verification. Pure, single pass, no partial mode.

use sealbox_crypto::PublicKey;
use thiserror::Error;
use tracing::warn;

use crate::entry::{AuditAction, AuditEntry, GENESIS_HASH};

/// One finding, tied to the entry's position in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// The entry's payload no longer hashes to its stored `entry_hash`.
    #[error("content tamper at position {position} (entry {id}): expected {expected}, stored {stored}")]
    ContentTamper {
        position: usize,
        id: String,
        expected: String,
        stored: String,
    },

    /// The entry's `prev_hash` is not the previous entry's `entry_hash`
    /// (or the genesis constant at position 0).
    #[error("linkage break at position {position} (entry {id}): expected prev {expected}, stored {stored}")]
    LinkageBreak {
        position: usize,
        id: String,
        expected: String,
        stored: String,
    },

    /// The stored record at this position does not decode as an entry.
    #[error("malformed entry at position {position}: {reason}")]
    Malformed { position: usize, reason: String },

    /// A signed entry whose signature does not verify under the owner's key.
    #[error("invalid signature at position {position} (entry {id})")]
    SignatureInvalid { position: usize, id: String },

    /// An entry that must be signed carries no signature.
    #[error("missing signature at position {position} (entry {id})")]
    SignatureMissing { position: usize, id: String },
}

impl AuditError {
    pub fn position(&self) -> usize {
        match self {
            AuditError::ContentTamper { position, .. }
            | AuditError::LinkageBreak { position, .. }
            | AuditError::Malformed { position, .. }
            | AuditError::SignatureInvalid { position, .. }
            | AuditError::SignatureMissing { position, .. } => *position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("audit log tampering detected: {} finding(s)", .0.len())]
pub struct AuditTamperDetected(pub Vec<AuditError>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub valid: bool,
    pub errors: Vec<AuditError>,
}

impl VerifyReport {
    pub fn into_result(self) -> Result<(), AuditTamperDetected> {
        if self.valid {
            Ok(())
        } else {
            Err(AuditTamperDetected(self.errors))
        }
    }
}

/// One position of a log as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntry {
    Entry(AuditEntry),
    /// The record exists but does not decode; carries the decode error.
    Malformed(String),
}

/// Verify the hash chain of a log in stored order.
///
/// Content is checked against each entry's own `prev_hash`, linkage against
/// the previous entry's actual hash, so a rewritten payload and a reordered
/// or missing entry are reported as distinct findings.
pub fn verify(entries: &[AuditEntry]) -> VerifyReport {
    check(entries.iter().map(Ok), None)
}

/// Verify a stored log, including undecodable positions and signatures.
///
/// Every entry must carry a valid signature by `signer`. The one exception
/// is `unlock_failed` past position 0, which is written before any key is
/// unlocked; if such an entry is signed, the signature is still checked. A
/// malformed position is reported and the next entry's linkage is not
/// checked against it.
pub fn verify_stored(log: &[StoredEntry], signer: &PublicKey) -> VerifyReport {
    let slots = log.iter().map(|slot| match slot {
        StoredEntry::Entry(entry) => Ok(entry),
        StoredEntry::Malformed(reason) => Err(reason.as_str()),
    });
    check(slots, Some(signer))
}

fn check<'a>(
    slots: impl Iterator<Item = Result<&'a AuditEntry, &'a str>>,
    signer: Option<&PublicKey>,
) -> VerifyReport {
    let mut errors = Vec::new();
    let mut expected_prev: Option<&str> = Some(GENESIS_HASH);

    for (position, slot) in slots.enumerate() {
        let entry = match slot {
            Ok(entry) => entry,
            Err(reason) => {
                errors.push(AuditError::Malformed {
                    position,
                    reason: reason.to_string(),
                });
                expected_prev = None;
                continue;
            }
        };

        if let Some(expected) = expected_prev {
            if entry.prev_hash != expected {
                errors.push(AuditError::LinkageBreak {
                    position,
                    id: entry.id.clone(),
                    expected: expected.to_string(),
                    stored: entry.prev_hash.clone(),
                });
            }
        }

        let recomputed = entry
            .payload
            .chain_hash(&entry.prev_hash)
            .unwrap_or_else(|e| format!("<unhashable: {e}>"));
        if recomputed != entry.entry_hash {
            errors.push(AuditError::ContentTamper {
                position,
                id: entry.id.clone(),
                expected: recomputed,
                stored: entry.entry_hash.clone(),
            });
        }

        if let Some(signer) = signer {
            let may_be_unsigned =
                position > 0 && entry.payload.action == AuditAction::UnlockFailed;
            match &entry.signature {
                None if may_be_unsigned => {}
                None => errors.push(AuditError::SignatureMissing {
                    position,
                    id: entry.id.clone(),
                }),
                Some(_) => {
                    if entry.verify_signature(signer).is_err() {
                        errors.push(AuditError::SignatureInvalid {
                            position,
                            id: entry.id.clone(),
                        });
                    }
                }
            }
        }

        expected_prev = Some(entry.entry_hash.as_str());
    }

    for finding in &errors {
        warn!(position = finding.position(), "audit chain: {finding}");
    }

    VerifyReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditAction, AuditPayload};

    fn build_log(n: usize) -> Vec<AuditEntry> {
        let mut log: Vec<AuditEntry> = Vec::new();
        for i in 0..n {
            let payload = AuditPayload::new("alice", AuditAction::Upload).with("file_id", format!("f{i}"));
            let entry = AuditEntry::append(log.last(), payload).unwrap();
            log.push(entry);
        }
        log
    }

    #[test]
    fn test_empty_log_is_valid() {
        let report = verify(&[]);
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_untouched_log_is_valid() {
        let report = verify(&build_log(10));
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_content_mutation_flags_position() {
        let mut log = build_log(5);
        log[2]
            .payload
            .context
            .insert("file_id".into(), "forged".into());

        let report = verify(&log);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            AuditError::ContentTamper { position: 2, .. }
        ));
    }

    #[test]
    fn test_rewritten_hash_breaks_downstream_linkage() {
        let mut log = build_log(4);
        log[1].payload.actor = "mallory".into();
        log[1].entry_hash = log[1].payload.chain_hash(&log[1].prev_hash).unwrap();

        let report = verify(&log);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            AuditError::LinkageBreak { position: 2, .. }
        ));
    }

    #[test]
    fn test_swapped_entries_break_linkage() {
        let mut log = build_log(4);
        log.swap(1, 2);

        let report = verify(&log);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .all(|e| matches!(e, AuditError::LinkageBreak { .. })));
        let positions: Vec<usize> = report.errors.iter().map(|e| e.position()).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_removed_entry_breaks_linkage() {
        let mut log = build_log(4);
        log.remove(1);

        let report = verify(&log);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].position(), 1);
    }

    #[test]
    fn test_bad_genesis_is_linkage_break() {
        let mut log = build_log(1);
        log[0].prev_hash = "ab".repeat(32);

        let report = verify(&log);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, AuditError::LinkageBreak { position: 0, .. })));
    }

    #[test]
    fn test_into_result_carries_findings() {
        let mut log = build_log(3);
        log[0].payload.actor = "mallory".into();

        let err = verify(&log).into_result().unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert!(err.to_string().contains("1 finding"));
    }

    fn signed_log(key: &sealbox_crypto::PrivateKey, n: usize) -> Vec<StoredEntry> {
        let mut log: Vec<AuditEntry> = Vec::new();
        for i in 0..n {
            let action = if i == 0 { AuditAction::Register } else { AuditAction::Upload };
            let payload = AuditPayload::new("alice", action).with("seq", i.to_string());
            let mut entry = AuditEntry::append(log.last(), payload).unwrap();
            entry.sign(key).unwrap();
            log.push(entry);
        }
        log.into_iter().map(StoredEntry::Entry).collect()
    }

    #[test]
    fn test_signed_log_is_valid() {
        let key = sealbox_crypto::generate_keypair(2048).unwrap();
        let report = verify_stored(&signed_log(&key, 4), &key.public_key());
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn test_malformed_position_is_itemised_and_rest_still_checked() {
        let key = sealbox_crypto::generate_keypair(2048).unwrap();
        let mut log = signed_log(&key, 4);
        log[1] = StoredEntry::Malformed("not a tagged record".into());
        if let StoredEntry::Entry(entry) = &mut log[3] {
            entry.payload.actor = "mallory".into();
        }

        let report = verify_stored(&log, &key.public_key());
        let positions: Vec<usize> = report.errors.iter().map(|e| e.position()).collect();
        assert_eq!(positions, vec![1, 3]);
        assert!(matches!(report.errors[0], AuditError::Malformed { position: 1, .. }));
        assert!(matches!(report.errors[1], AuditError::ContentTamper { position: 3, .. }));
    }

    #[test]
    fn test_rewritten_log_fails_signature_check() {
        let key = sealbox_crypto::generate_keypair(2048).unwrap();
        let forged = AuditEntry::append(
            None,
            AuditPayload::new("alice", AuditAction::Register).with("forged", "yes"),
        )
        .unwrap();
        assert!(verify(std::slice::from_ref(&forged)).valid);

        let report = verify_stored(&[StoredEntry::Entry(forged.clone())], &key.public_key());
        assert!(matches!(
            report.errors.as_slice(),
            [AuditError::SignatureMissing { position: 0, .. }]
        ));

        let mallory = sealbox_crypto::generate_keypair(2048).unwrap();
        let mut resigned = forged;
        resigned.sign(&mallory).unwrap();
        let report = verify_stored(&[StoredEntry::Entry(resigned)], &key.public_key());
        assert!(matches!(
            report.errors.as_slice(),
            [AuditError::SignatureInvalid { position: 0, .. }]
        ));
    }

    #[test]
    fn test_unsigned_unlock_failure_accepted_after_genesis() {
        let key = sealbox_crypto::generate_keypair(2048).unwrap();
        let mut log = signed_log(&key, 2);
        let last = match &log[1] {
            StoredEntry::Entry(entry) => entry.clone(),
            StoredEntry::Malformed(_) => unreachable!(),
        };
        let failed =
            AuditEntry::append(Some(&last), AuditPayload::new("alice", AuditAction::UnlockFailed))
                .unwrap();
        log.push(StoredEntry::Entry(failed));

        assert!(verify_stored(&log, &key.public_key()).valid);
    }
}
