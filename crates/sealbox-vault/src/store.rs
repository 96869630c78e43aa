//! Record store over an OpenDAL operator.
//!
//! Layout (every object is a tagged JSON record):
//! ```text
//! users/<username>.json
//! files/<file-id>.json
//! shares/<file-id>/<recipient>.json
//! index/<token>.json                 chain entries, write-once
//! index-state/<username>.json        sealed chain heads + generation
//! audit/<username>/<seq:020>.json    hash-chained audit entries
//! ```
//! The store only ever sees ciphertext, tokens and wrapped keys.

use opendal::Operator;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use sealbox_audit::{AuditEntry, AuditPayload, StoredEntry};
use sealbox_core::config::StorageConfig;
use sealbox_core::{
    decode, encode, unix_now, FileRecord, IndexStateRecord, Record, SealboxError, ShareRecord,
    UserRecord,
};
use sealbox_crypto::{Envelope, PrivateKey};
use sealbox_index::{ChainEntry, ChainLookup, IndexError, IndexResult, Token};

use crate::error::{storage_err, VaultError, VaultResult};

/// Build an OpenDAL operator for the configured backend.
pub fn build_operator(cfg: &StorageConfig) -> VaultResult<Operator> {
    let op = match cfg.backend.as_str() {
        "fs" => {
            let root = cfg.resolved_root();
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .map_err(|e| storage_err("opening", &root.display().to_string(), e))?
                .layer(opendal::layers::LoggingLayer::default())
                .layer(opendal::layers::RetryLayer::new().with_max_times(3).with_jitter())
                .finish()
        }
        "memory" => Operator::new(opendal::services::Memory::default())
            .map_err(|e| storage_err("opening", "memory", e))?
            .finish(),
        other => {
            return Err(SealboxError::Config(format!("unknown storage backend: {other}")).into())
        }
    };
    Ok(op)
}

fn user_path(username: &str) -> String {
    format!("users/{username}.json")
}

fn file_path(file_id: &str) -> String {
    format!("files/{file_id}.json")
}

fn share_dir(file_id: &str) -> String {
    format!("shares/{file_id}/")
}

fn share_path(file_id: &str, recipient: &str) -> String {
    format!("shares/{file_id}/{recipient}.json")
}

fn chain_path(token: &Token) -> String {
    format!("index/{}.json", token.to_path_segment())
}

fn index_state_path(username: &str) -> String {
    format!("index-state/{username}.json")
}

fn audit_dir(username: &str) -> String {
    format!("audit/{username}/")
}

fn audit_path(username: &str, seq: u64) -> String {
    format!("audit/{username}/{seq:020}.json")
}

/// Sequence number of an audit object path, if it has the expected shape.
fn audit_seq(path: &str) -> Option<u64> {
    let name = path.rsplit('/').next()?;
    name.strip_suffix(".json")?.parse().ok()
}

/// Usernames and file ids become path segments.
pub(crate) fn validate_segment(kind: &str, s: &str) -> VaultResult<()> {
    let ok = !s.is_empty()
        && s.len() <= 128
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !s.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(SealboxError::Record(format!("invalid {kind}: {s:?}")).into())
    }
}

pub struct VaultStore {
    op: Operator,
    /// Serializes read-check-write sequences (index-state swap, audit append).
    write_lock: Mutex<()>,
}

impl VaultStore {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            write_lock: Mutex::new(()),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    // ── Generic record I/O ───────────────────────────────────────────────────

    async fn get<T: Record>(&self, path: &str) -> VaultResult<Option<T>> {
        match self.op.read(path).await {
            Ok(data) => Ok(Some(decode(&data.to_vec())?)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err("reading", path, e)),
        }
    }

    async fn put<T: Record>(&self, path: &str, record: &T) -> VaultResult<()> {
        let bytes = encode(record)?;
        self.op
            .write(path, bytes)
            .await
            .map_err(|e| storage_err("writing", path, e))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> VaultResult<bool> {
        self.op
            .exists(path)
            .await
            .map_err(|e| storage_err("checking", path, e))
    }

    async fn delete(&self, path: &str) -> VaultResult<()> {
        self.op
            .delete(path)
            .await
            .map_err(|e| storage_err("deleting", path, e))
    }

    /// Object paths under `prefix`, sorted. A missing prefix lists as empty.
    async fn list_paths(&self, prefix: &str, recursive: bool) -> VaultResult<Vec<String>> {
        let entries = match self.op.list_with(prefix).recursive(recursive).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err("listing", prefix, e)),
        };

        let mut paths: Vec<String> = entries
            .into_iter()
            .map(|entry| entry.path().to_string())
            .filter(|path| !path.ends_with('/'))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Decode every record under `prefix`, skipping unreadable ones.
    async fn scan<T: Record>(&self, prefix: &str, recursive: bool) -> VaultResult<Vec<T>> {
        let mut out = Vec::new();
        for path in self.list_paths(prefix, recursive).await? {
            match self.get::<T>(&path).await {
                Ok(Some(record)) => out.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path, "skipping unreadable {} record: {e}", T::KIND),
            }
        }
        Ok(out)
    }

    // ── Users ────────────────────────────────────────────────────────────────

    pub async fn create_user(&self, user: &UserRecord) -> VaultResult<()> {
        validate_segment("username", &user.username)?;
        let path = user_path(&user.username);
        let _guard = self.write_lock.lock().await;
        if self.exists(&path).await? {
            return Err(VaultError::AlreadyExists(format!("user {}", user.username)));
        }
        self.put(&path, user).await
    }

    pub async fn user(&self, username: &str) -> VaultResult<Option<UserRecord>> {
        validate_segment("username", username)?;
        self.get(&user_path(username)).await
    }

    // ── Files ────────────────────────────────────────────────────────────────

    pub async fn file(&self, file_id: &str) -> VaultResult<Option<FileRecord>> {
        validate_segment("file id", file_id)?;
        self.get(&file_path(file_id)).await
    }

    pub async fn put_file(&self, file: &FileRecord) -> VaultResult<()> {
        validate_segment("file id", &file.id)?;
        self.put(&file_path(&file.id), file).await
    }

    pub async fn delete_file(&self, file_id: &str) -> VaultResult<()> {
        self.delete(&file_path(file_id)).await
    }

    pub async fn files_owned_by(&self, owner: &str) -> VaultResult<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self
            .scan::<FileRecord>("files/", false)
            .await?
            .into_iter()
            .filter(|f| f.owner == owner)
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(files)
    }

    /// Fetch many files by id, in request order. Ids with no record are
    /// dropped: search results may point at purged files.
    pub async fn files_batch(&self, ids: &[String]) -> VaultResult<Vec<FileRecord>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if validate_segment("file id", id).is_err() {
                debug!(file_id = %id, "dropping malformed id from batch fetch");
                continue;
            }
            if let Some(file) = self.file(id).await? {
                out.push(file);
            }
        }
        Ok(out)
    }

    /// Store an upload: chain entries first, then the file record. On any
    /// failure the entries already written are removed again.
    pub async fn commit_upload<'a>(
        &self,
        file: &FileRecord,
        entries: impl IntoIterator<Item = &'a ChainEntry>,
    ) -> VaultResult<()> {
        let mut written: Vec<String> = Vec::new();
        let result: VaultResult<()> = async {
            for entry in entries {
                let path = chain_path(&entry.token);
                if self.exists(&path).await? {
                    return Err(VaultError::Index(IndexError::TokenExists(entry.token)));
                }
                self.put(&path, entry).await?;
                written.push(path);
            }
            self.put_file(file).await
        }
        .await;

        if result.is_err() {
            for path in &written {
                if let Err(e) = self.delete(path).await {
                    warn!(path = %path, "failed to remove orphaned chain entry: {e}");
                }
            }
        }
        result
    }

    // ── Shares ───────────────────────────────────────────────────────────────

    pub async fn share(&self, file_id: &str, recipient: &str) -> VaultResult<Option<ShareRecord>> {
        validate_segment("file id", file_id)?;
        validate_segment("username", recipient)?;
        self.get(&share_path(file_id, recipient)).await
    }

    /// Insert or replace the share for (file, recipient).
    pub async fn put_share(&self, share: &ShareRecord) -> VaultResult<()> {
        validate_segment("file id", &share.file_id)?;
        validate_segment("username", &share.recipient)?;
        self.put(&share_path(&share.file_id, &share.recipient), share)
            .await
    }

    pub async fn delete_share(&self, file_id: &str, recipient: &str) -> VaultResult<()> {
        self.delete(&share_path(file_id, recipient)).await
    }

    pub async fn shares_for_file(&self, file_id: &str) -> VaultResult<Vec<ShareRecord>> {
        validate_segment("file id", file_id)?;
        self.scan(&share_dir(file_id), false).await
    }

    pub async fn shares_for_recipient(&self, recipient: &str) -> VaultResult<Vec<ShareRecord>> {
        let suffix = format!("/{recipient}.json");
        let mut out = Vec::new();
        for path in self.list_paths("shares/", true).await? {
            if !path.ends_with(&suffix) {
                continue;
            }
            match self.get::<ShareRecord>(&path).await {
                Ok(Some(share)) if share.recipient == recipient => out.push(share),
                Ok(_) => {}
                Err(e) => warn!(path = %path, "skipping unreadable share record: {e}"),
            }
        }
        Ok(out)
    }

    // ── Index state ──────────────────────────────────────────────────────────

    pub async fn index_state(&self, username: &str) -> VaultResult<Option<IndexStateRecord>> {
        validate_segment("username", username)?;
        self.get(&index_state_path(username)).await
    }

    /// Compare-and-swap the sealed index state. Succeeds only when the stored
    /// generation (0 if none) equals `expected`; returns the new generation.
    pub async fn swap_index_state(
        &self,
        username: &str,
        expected: u64,
        state: Envelope,
    ) -> VaultResult<u64> {
        validate_segment("username", username)?;
        let _guard = self.write_lock.lock().await;

        let found = self
            .index_state(username)
            .await?
            .map_or(0, |record| record.generation);
        if found != expected {
            return Err(VaultError::IndexStateConflict { expected, found });
        }

        let record = IndexStateRecord {
            owner: username.to_string(),
            generation: expected + 1,
            state,
            updated_at: unix_now(),
        };
        self.put(&index_state_path(username), &record).await?;
        Ok(record.generation)
    }

    // ── Audit log ────────────────────────────────────────────────────────────

    /// Every stored position of a user's log with its object path, in
    /// stored order. Records that do not decode are kept as
    /// [`StoredEntry::Malformed`] rather than failing the whole read.
    async fn audit_records(&self, username: &str) -> VaultResult<Vec<(String, StoredEntry)>> {
        validate_segment("username", username)?;
        let mut out = Vec::new();
        for path in self.list_paths(&audit_dir(username), false).await? {
            let data = match self.op.read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => continue,
                Err(e) => return Err(storage_err("reading", &path, e)),
            };
            let slot = match decode::<AuditEntry>(&data.to_vec()) {
                Ok(entry) => StoredEntry::Entry(entry),
                Err(e) => {
                    warn!(path = %path, "undecodable audit entry: {e}");
                    StoredEntry::Malformed(e.to_string())
                }
            };
            out.push((path, slot));
        }
        Ok(out)
    }

    /// Append to a user's log, chaining from the last entry that decodes and
    /// signing with `signer` when one is given. The new entry takes the
    /// sequence number after the highest stored one and never replaces an
    /// existing object.
    pub async fn append_audit(
        &self,
        username: &str,
        payload: AuditPayload,
        signer: Option<&PrivateKey>,
    ) -> VaultResult<AuditEntry> {
        let _guard = self.write_lock.lock().await;

        let records = self.audit_records(username).await?;
        let last = records.iter().rev().find_map(|(_, slot)| match slot {
            StoredEntry::Entry(entry) => Some(entry),
            StoredEntry::Malformed(_) => None,
        });

        let mut entry = AuditEntry::append(last, payload).map_err(SealboxError::from)?;
        if let Some(key) = signer {
            entry.sign(key)?;
        }

        let seq = records
            .iter()
            .filter_map(|(path, _)| audit_seq(path))
            .max()
            .map_or(0, |s| s + 1);
        let path = audit_path(username, seq);
        if self.exists(&path).await? {
            return Err(VaultError::AlreadyExists(format!("audit entry {path}")));
        }
        self.put(&path, &entry).await?;
        Ok(entry)
    }

    /// The log as stored, one slot per position, for verification.
    pub async fn audit_entries(&self, username: &str) -> VaultResult<Vec<StoredEntry>> {
        Ok(self
            .audit_records(username)
            .await?
            .into_iter()
            .map(|(_, slot)| slot)
            .collect())
    }

    /// The decodable entries of a user's log, in stored order.
    pub async fn audit_log(&self, username: &str) -> VaultResult<Vec<AuditEntry>> {
        Ok(self
            .audit_entries(username)
            .await?
            .into_iter()
            .filter_map(|slot| match slot {
                StoredEntry::Entry(entry) => Some(entry),
                StoredEntry::Malformed(_) => None,
            })
            .collect())
    }
}

impl ChainLookup for VaultStore {
    async fn entry(&self, token: &Token) -> IndexResult<Option<ChainEntry>> {
        let path = chain_path(token);
        let data = match self.op.read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IndexError::Lookup(format!("reading {path}: {e}"))),
        };

        let entry: ChainEntry = decode(&data.to_vec())
            .map_err(|e| IndexError::Lookup(format!("decoding {path}: {e}")))?;
        if entry.token != *token {
            warn!(path = %path, "chain entry stored under the wrong token");
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> VaultStore {
        let op = Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish();
        VaultStore::new(op)
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("username", "alice").is_ok());
        assert!(validate_segment("username", "a.b-c_d").is_ok());
        assert!(validate_segment("username", "").is_err());
        assert!(validate_segment("username", "../etc").is_err());
        assert!(validate_segment("username", "a/b").is_err());
        assert!(validate_segment("username", ".hidden").is_err());
    }

    #[tokio::test]
    async fn test_index_state_generation_cas() {
        let store = memory_store();
        let sealed = sealbox_crypto::encrypt(b"{}", &[7u8; 32]).unwrap();

        assert_eq!(store.swap_index_state("alice", 0, sealed.clone()).await.unwrap(), 1);
        assert_eq!(store.swap_index_state("alice", 1, sealed.clone()).await.unwrap(), 2);

        let stale = store.swap_index_state("alice", 1, sealed).await;
        assert!(matches!(
            stale,
            Err(VaultError::IndexStateConflict { expected: 1, found: 2 })
        ));
    }

    #[tokio::test]
    async fn test_audit_append_chains_entries() {
        let store = memory_store();
        for _ in 0..3 {
            store
                .append_audit(
                    "alice",
                    AuditPayload::new("alice", sealbox_audit::AuditAction::Upload),
                    None,
                )
                .await
                .unwrap();
        }

        let log = store.audit_log("alice").await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].prev_hash, log[0].entry_hash);
        assert!(sealbox_audit::verify(&log).valid);
        assert!(store.audit_log("bob").await.unwrap().is_empty());
    }

    #[test]
    fn test_audit_seq_parsing() {
        assert_eq!(audit_seq(&audit_path("alice", 7)), Some(7));
        assert_eq!(audit_seq("audit/alice/00000000000000000012.json"), Some(12));
        assert_eq!(audit_seq("audit/alice/notes.txt"), None);
    }

    #[tokio::test]
    async fn test_audit_append_after_gap_keeps_existing_entries() {
        let store = memory_store();
        let mut hashes = Vec::new();
        for _ in 0..3 {
            let entry = store
                .append_audit(
                    "alice",
                    AuditPayload::new("alice", sealbox_audit::AuditAction::Upload),
                    None,
                )
                .await
                .unwrap();
            hashes.push(entry.entry_hash);
        }
        store.operator().delete(&audit_path("alice", 1)).await.unwrap();

        let next = store
            .append_audit(
                "alice",
                AuditPayload::new("alice", sealbox_audit::AuditAction::Trash),
                None,
            )
            .await
            .unwrap();
        assert_eq!(next.prev_hash, hashes[2]);

        let stored: Vec<String> = store
            .audit_log("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.entry_hash)
            .collect();
        assert_eq!(stored, vec![hashes[0].clone(), hashes[2].clone(), next.entry_hash]);
        assert!(store.operator().exists(&audit_path("alice", 3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_audit_append_skips_undecodable_tail() {
        let store = memory_store();
        let first = store
            .append_audit(
                "alice",
                AuditPayload::new("alice", sealbox_audit::AuditAction::Register),
                None,
            )
            .await
            .unwrap();
        store
            .operator()
            .write(&audit_path("alice", 1), b"garbage".to_vec())
            .await
            .unwrap();

        let next = store
            .append_audit(
                "alice",
                AuditPayload::new("alice", sealbox_audit::AuditAction::Upload),
                None,
            )
            .await
            .unwrap();
        assert_eq!(next.prev_hash, first.entry_hash);

        let slots = store.audit_entries("alice").await.unwrap();
        assert_eq!(slots.len(), 3);
        assert!(matches!(slots[1], StoredEntry::Malformed(_)));
        assert_eq!(store.audit_log("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_chain_entry_is_none() {
        let store = memory_store();
        let token = Token::generate().unwrap();
        assert!(store.entry(&token).await.unwrap().is_none());
    }
}
