//! Vault flows: every operation the client exposes upward.
//!
//! All cryptography runs here, on the client side of [`VaultStore`]. The
//! store sees wrapped keys, sealed envelopes and random chain tokens only.

use secrecy::SecretString;
use tracing::{debug, info, warn};

use sealbox_audit::{verify_stored, AuditAction, AuditEntry, AuditPayload, VerifyReport};
use sealbox_core::{
    decode, encode, unix_now, FileMetadata, FileRecord, KeyGrant, Permission, SealboxConfig,
    ShareRecord, UserRecord,
};
use sealbox_crypto::{
    accept_share, decrypt, encrypt, share_file_key, FileKey, KeyHierarchy, KeyParams, PrivateKey,
    PublicKey,
};
use sealbox_index::{normalize_keywords, search, ChainInconsistency, ChainState};

use crate::error::{VaultError, VaultResult};
use crate::session::Session;
use crate::store::{build_operator, VaultStore};

/// How the viewer reached a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner,
    Shared(Permission),
}

/// A file as seen by one user, with metadata decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileView {
    pub id: String,
    pub owner: String,
    pub metadata: FileMetadata,
    pub created_at: u64,
    pub trashed: bool,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub metadata: FileMetadata,
    pub content: Vec<u8>,
}

/// Input to [`Vault::upload`].
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub name: String,
    pub content_type: Option<String>,
    pub keywords: Vec<String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub files: Vec<FileView>,
    /// Ids from the chain that no longer resolve to a live, readable file
    pub stale: usize,
    pub anomaly: Option<ChainInconsistency>,
}

pub struct Vault {
    store: VaultStore,
    params: KeyParams,
    max_hops: usize,
}

impl Vault {
    pub fn new(store: VaultStore, params: KeyParams, max_hops: usize) -> Self {
        Self {
            store,
            params,
            max_hops,
        }
    }

    pub fn from_config(config: &SealboxConfig) -> VaultResult<Self> {
        config.validate()?;
        let op = build_operator(&config.storage)?;
        Ok(Self::new(
            VaultStore::new(op),
            KeyParams::from(&config.crypto),
            config.index.max_hops,
        ))
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    async fn audit(
        &self,
        user: &str,
        payload: AuditPayload,
        signer: Option<&PrivateKey>,
    ) -> VaultResult<AuditEntry> {
        let entry = self.store.append_audit(user, payload, signer).await?;
        debug!(user = %user, action = %entry.payload.action, "audit entry appended");
        Ok(entry)
    }

    /// Audit a change that has already been stored. The change stands even
    /// if the append fails, so the failure is logged rather than returned.
    async fn record(&self, user: &str, payload: AuditPayload, signer: Option<&PrivateKey>) {
        let action = payload.action;
        if let Err(e) = self.audit(user, payload, signer).await {
            warn!(user = %user, %action, "audit entry not recorded: {e}");
        }
    }

    /// Record a signed entry for an operation on `session`'s behalf.
    async fn record_for(&self, session: &Session, payload: AuditPayload) {
        let signer = session.keys().ok().map(|keys| &keys.private);
        self.record(session.user(), payload, signer).await;
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    /// Create a user and return an unlocked session for them.
    pub async fn register(&self, username: &str, password: &SecretString) -> VaultResult<Session> {
        if self.store.user(username).await?.is_some() {
            return Err(VaultError::AlreadyExists(format!("user {username}")));
        }

        let registration = sealbox_crypto::register(password, &self.params)?;
        let record = UserRecord {
            username: username.to_string(),
            keys: registration.bundle,
            created_at: unix_now(),
        };
        self.store.create_user(&record).await?;
        self.record(
            username,
            AuditPayload::new(username, AuditAction::Register),
            Some(&registration.keys.private),
        )
        .await;

        info!(user = %username, "user registered");
        Ok(Session::new(username, KeyHierarchy::from_keys(registration.keys)))
    }

    /// Unlock a user's keys and load their index state.
    pub async fn unlock(&self, username: &str, password: &SecretString) -> VaultResult<Session> {
        let user = self
            .store
            .user(username)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("user {username}")))?;

        let mut keys = KeyHierarchy::new();
        if let Err(e) = keys.unlock(password, &user.keys) {
            let payload = AuditPayload::new(username, AuditAction::UnlockFailed);
            self.record(username, payload, None).await;
            return Err(e.into());
        }

        let mut session = Session::new(username, keys);
        self.load_index_state(&mut session).await?;
        info!(user = %username, keywords = session.chains().len(), "session unlocked");
        Ok(session)
    }

    pub fn logout(&self, mut session: Session) {
        session.clear();
        info!(user = %session.user(), "session closed");
    }

    // ── Index state ──────────────────────────────────────────────────────────

    /// Replace the session's chain heads with the stored blob (or an empty
    /// state when none exists yet).
    pub async fn load_index_state(&self, session: &mut Session) -> VaultResult<()> {
        let master = session.keys.master_key()?;
        match self.store.index_state(session.user()).await? {
            Some(record) => {
                let chains = ChainState::open(&record.state, master)?;
                session.replace_chains(chains, record.generation);
            }
            None => session.replace_chains(ChainState::new(), 0),
        }
        Ok(())
    }

    /// Seal the chain heads under Km and store them. Fails with
    /// [`VaultError::IndexStateConflict`] if another session persisted since
    /// this one loaded.
    pub async fn persist_index_state(&self, session: &mut Session) -> VaultResult<u64> {
        let sealed = session.chains.seal(session.keys.master_key()?)?;
        let generation = self
            .store
            .swap_index_state(session.user(), session.index_generation, sealed)
            .await?;

        session.index_generation = generation;
        session.set_index_dirty(false);
        debug!(user = %session.user(), generation, "index state persisted");
        Ok(generation)
    }

    // ── Files ────────────────────────────────────────────────────────────────

    /// Encrypt and store a new file, tagging it with its keywords.
    ///
    /// If storing fails, the chain heads this upload advanced are rolled
    /// back. A head that another upload in the same session has already
    /// advanced past the unstored entry cannot be restored: that keyword's
    /// chain then ends in a missing link, and searches return only the
    /// entries above it with a `MissingLink` anomaly.
    pub async fn upload(&self, session: &Session, file: NewFile) -> VaultResult<String> {
        let keys = session.keys()?;
        let file_id = uuid::Uuid::new_v4().to_string();
        let file_key = FileKey::generate()?;

        let keywords = normalize_keywords(&file.keywords);
        let metadata = FileMetadata {
            name: file.name,
            size: file.content.len() as u64,
            content_type: file.content_type,
            keywords: keywords.clone(),
        };

        let record = FileRecord {
            id: file_id.clone(),
            owner: session.user().to_string(),
            metadata: encrypt(&encode(&metadata)?, file_key.as_bytes())?,
            content: encrypt(&file.content, file_key.as_bytes())?,
            key: KeyGrant::Owner {
                wrapped: session.keys.wrap_file_key(&file_key)?,
            },
            created_at: unix_now(),
            trashed: false,
        };

        let batch = session.chains().tag(&file_id, &keywords, &keys.search)?;
        if let Err(e) = self.store.commit_upload(&record, batch.entries()).await {
            let restored = session.chains().rollback(&batch);
            let stranded = batch.len() - restored;
            if stranded > 0 {
                warn!(
                    file_id = %file_id,
                    stranded,
                    "upload failed; some keyword heads had moved on and now point past a missing link"
                );
            } else {
                warn!(file_id = %file_id, restored, "upload failed, chain heads rolled back: {e}");
            }
            return Err(e);
        }
        if !batch.is_empty() {
            session.set_index_dirty(true);
        }

        self.record(
            session.user(),
            AuditPayload::new(session.user(), AuditAction::Upload)
                .with("file_id", file_id.as_str())
                .with("size", metadata.size.to_string()),
            Some(&keys.private),
        )
        .await;

        info!(file_id = %file_id, keywords = batch.len(), "file uploaded");
        Ok(file_id)
    }

    /// The key grant that applies to `session`'s user for this file.
    async fn grant_for(&self, session: &Session, file: &FileRecord) -> VaultResult<KeyGrant> {
        if file.owner == session.user() {
            return Ok(file.key.clone());
        }
        let share = self
            .store
            .share(&file.id, session.user())
            .await?
            .ok_or_else(|| VaultError::Forbidden(format!("file {} is not shared with you", file.id)))?;
        Ok(KeyGrant::Shared {
            recipient: share.recipient,
            wrapped: share.wrapped_key,
            permission: share.permission,
        })
    }

    fn open_grant(&self, session: &Session, grant: &KeyGrant) -> VaultResult<(FileKey, Access)> {
        match grant {
            KeyGrant::Owner { wrapped } => {
                Ok((session.keys.unwrap_file_key(wrapped)?, Access::Owner))
            }
            KeyGrant::Shared {
                wrapped,
                permission,
                ..
            } => {
                let kf = accept_share(wrapped, session.keys.private_key()?)?;
                Ok((kf, Access::Shared(*permission)))
            }
        }
    }

    fn view(&self, file: &FileRecord, file_key: &FileKey, access: Access) -> VaultResult<FileView> {
        let plaintext = decrypt(&file.metadata, file_key.as_bytes())?;
        Ok(FileView {
            id: file.id.clone(),
            owner: file.owner.clone(),
            metadata: decode(&plaintext)?,
            created_at: file.created_at,
            trashed: file.trashed,
            access,
        })
    }

    /// Decrypt metadata for each file, skipping (and logging) the ones that fail.
    async fn views(&self, session: &Session, files: Vec<FileRecord>) -> VaultResult<Vec<FileView>> {
        session.keys()?;
        let mut out = Vec::with_capacity(files.len());
        for file in files {
            let opened = match self.grant_for(session, &file).await {
                Ok(grant) => self
                    .open_grant(session, &grant)
                    .and_then(|(kf, access)| self.view(&file, &kf, access)),
                Err(e) => Err(e),
            };
            match opened {
                Ok(view) => out.push(view),
                Err(e) => warn!(file_id = %file.id, "skipping file with unreadable metadata: {e}"),
            }
        }
        Ok(out)
    }

    /// Owned files that are not in the trash.
    pub async fn list(&self, session: &Session) -> VaultResult<Vec<FileView>> {
        let files = self.store.files_owned_by(session.user()).await?;
        let live = files.into_iter().filter(|f| !f.trashed).collect();
        self.views(session, live).await
    }

    pub async fn list_trash(&self, session: &Session) -> VaultResult<Vec<FileView>> {
        let files = self.store.files_owned_by(session.user()).await?;
        let trashed = files.into_iter().filter(|f| f.trashed).collect();
        self.views(session, trashed).await
    }

    /// Files other users have shared with this session's user.
    pub async fn list_shared(&self, session: &Session) -> VaultResult<Vec<FileView>> {
        let shares = self.store.shares_for_recipient(session.user()).await?;
        let ids: Vec<String> = shares.into_iter().map(|s| s.file_id).collect();
        let files = self
            .store
            .files_batch(&ids)
            .await?
            .into_iter()
            .filter(|f| !f.trashed)
            .collect();
        self.views(session, files).await
    }

    /// Fetch and decrypt a file through the owner or share path.
    pub async fn download(&self, session: &Session, file_id: &str) -> VaultResult<Download> {
        let file = self.live_file(file_id).await?;
        let grant = self.grant_for(session, &file).await?;
        let (kf, access) = self.open_grant(session, &grant)?;
        let view = self.view(&file, &kf, access)?;
        let content = decrypt(&file.content, kf.as_bytes())?;
        debug!(file_id = %file_id, bytes = content.len(), "file downloaded");
        Ok(Download {
            metadata: view.metadata,
            content,
        })
    }

    async fn live_file(&self, file_id: &str) -> VaultResult<FileRecord> {
        match self.store.file(file_id).await? {
            Some(file) if !file.trashed => Ok(file),
            _ => Err(VaultError::NotFound(format!("file {file_id}"))),
        }
    }

    async fn owned_file(&self, session: &Session, file_id: &str) -> VaultResult<FileRecord> {
        let file = self
            .store
            .file(file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("file {file_id}")))?;
        if file.owner != session.user() {
            return Err(VaultError::Forbidden(format!(
                "only the owner may manage file {file_id}"
            )));
        }
        Ok(file)
    }

    // ── Sharing ──────────────────────────────────────────────────────────────

    /// Wrap Kf for `recipient` and store the grant, replacing any existing
    /// share of this file with them.
    pub async fn share(
        &self,
        session: &Session,
        file_id: &str,
        recipient: &str,
        permission: Permission,
    ) -> VaultResult<()> {
        let file = self.owned_file(session, file_id).await?;
        if file.trashed {
            return Err(VaultError::NotFound(format!("file {file_id}")));
        }
        if recipient == session.user() {
            return Err(VaultError::Forbidden("cannot share a file with yourself".into()));
        }
        let target = self
            .store
            .user(recipient)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("user {recipient}")))?;

        let (kf, _) = self.open_grant(session, &file.key)?;
        let recipient_pub = PublicKey::from_b64(&target.keys.public_key)?;
        let wrapped_key = share_file_key(&recipient_pub, &kf)?;

        let replaced = self.store.share(file_id, recipient).await?.is_some();
        self.store
            .put_share(&ShareRecord {
                file_id: file_id.to_string(),
                owner: session.user().to_string(),
                recipient: recipient.to_string(),
                wrapped_key,
                permission,
                created_at: unix_now(),
            })
            .await?;

        self.record_for(
            session,
            AuditPayload::new(session.user(), AuditAction::Share)
                .with("file_id", file_id)
                .with("recipient", recipient)
                .with("permission", permission.to_string()),
        )
        .await;

        info!(file_id = %file_id, recipient = %recipient, %permission, replaced, "file shared");
        Ok(())
    }

    /// Recover Kf from the share addressed to this session's user.
    pub async fn accept(&self, session: &Session, file_id: &str) -> VaultResult<FileKey> {
        let share = self
            .store
            .share(file_id, session.user())
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("share of {file_id}")))?;
        Ok(accept_share(&share.wrapped_key, session.keys.private_key()?)?)
    }

    /// Delete the stored grant for `recipient`.
    ///
    /// The file is not re-keyed: a recipient who already holds Kf can still
    /// decrypt the stored ciphertext.
    pub async fn revoke(&self, session: &Session, file_id: &str, recipient: &str) -> VaultResult<()> {
        self.owned_file(session, file_id).await?;
        if self.store.share(file_id, recipient).await?.is_none() {
            return Err(VaultError::NotFound(format!(
                "share of {file_id} with {recipient}"
            )));
        }
        self.store.delete_share(file_id, recipient).await?;

        self.record_for(
            session,
            AuditPayload::new(session.user(), AuditAction::Revoke)
                .with("file_id", file_id)
                .with("recipient", recipient),
        )
        .await;

        info!(file_id = %file_id, recipient = %recipient, "share revoked");
        Ok(())
    }

    pub async fn list_shares(&self, session: &Session, file_id: &str) -> VaultResult<Vec<ShareRecord>> {
        self.owned_file(session, file_id).await?;
        self.store.shares_for_file(file_id).await
    }

    // ── Search ───────────────────────────────────────────────────────────────

    /// Search one keyword through the session's chain heads.
    pub async fn search(&self, session: &Session, keyword: &str) -> VaultResult<SearchResults> {
        let keys = session.keys()?;
        let outcome = search(
            session.chains(),
            &self.store,
            keyword,
            &keys.search,
            self.max_hops,
        )
        .await?;

        let wanted = outcome.file_ids.len();
        let live: Vec<FileRecord> = self
            .store
            .files_batch(&outcome.file_ids)
            .await?
            .into_iter()
            .filter(|f| !f.trashed)
            .collect();
        let files = self.views(session, live).await?;

        let stale = wanted - files.len();
        if stale > 0 {
            debug!(stale, "search dropped ids that no longer resolve");
        }
        Ok(SearchResults {
            files,
            stale,
            anomaly: outcome.anomaly,
        })
    }

    // ── Trash ────────────────────────────────────────────────────────────────

    pub async fn trash(&self, session: &Session, file_id: &str) -> VaultResult<()> {
        self.set_trashed(session, file_id, true).await
    }

    pub async fn restore(&self, session: &Session, file_id: &str) -> VaultResult<()> {
        self.set_trashed(session, file_id, false).await
    }

    async fn set_trashed(&self, session: &Session, file_id: &str, trashed: bool) -> VaultResult<()> {
        let mut file = self.owned_file(session, file_id).await?;
        if file.trashed == trashed {
            return Ok(());
        }
        file.trashed = trashed;
        self.store.put_file(&file).await?;

        let action = if trashed {
            AuditAction::Trash
        } else {
            AuditAction::Restore
        };
        self.record_for(
            session,
            AuditPayload::new(session.user(), action).with("file_id", file_id),
        )
        .await;
        info!(file_id = %file_id, trashed, "trash flag updated");
        Ok(())
    }

    /// Delete a file record and its shares. Kf is gone with the record;
    /// chain entries stay and resolve as stale.
    pub async fn purge(&self, session: &Session, file_id: &str) -> VaultResult<()> {
        self.owned_file(session, file_id).await?;

        let shares = self.store.shares_for_file(file_id).await?;
        for share in &shares {
            self.store.delete_share(file_id, &share.recipient).await?;
        }
        self.store.delete_file(file_id).await?;

        self.record_for(
            session,
            AuditPayload::new(session.user(), AuditAction::Purge)
                .with("file_id", file_id)
                .with("shares_removed", shares.len().to_string()),
        )
        .await;
        info!(file_id = %file_id, shares = shares.len(), "file purged");
        Ok(())
    }

    // ── Audit ────────────────────────────────────────────────────────────────

    pub async fn audit_log(&self, session: &Session) -> VaultResult<Vec<AuditEntry>> {
        self.store.audit_log(session.user()).await
    }

    /// Verify this user's stored log, signatures included. The public key
    /// comes from the session's unlocked keypair, not from storage.
    pub async fn verify_audit(&self, session: &Session) -> VaultResult<VerifyReport> {
        let signer = &session.keys()?.public;
        let log = self.store.audit_entries(session.user()).await?;
        let report = verify_stored(&log, signer);
        if !report.valid {
            warn!(
                user = %session.user(),
                findings = report.errors.len(),
                "audit log failed verification"
            );
        }
        Ok(report)
    }
}
