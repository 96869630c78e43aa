use sealbox_audit::AuditTamperDetected;
use sealbox_core::SealboxError;
use sealbox_crypto::CryptoError;
use sealbox_index::IndexError;
use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Core(#[from] SealboxError),

    #[error(transparent)]
    Audit(#[from] AuditTamperDetected),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Another session persisted index state since this one loaded it.
    #[error("index state changed underneath this session (loaded generation {expected}, stored {found})")]
    IndexStateConflict { expected: u64, found: u64 },
}

impl VaultError {
    /// True for a wrong password (or tampered key bundle) at unlock.
    pub fn is_wrong_passphrase(&self) -> bool {
        matches!(self, VaultError::Crypto(CryptoError::WrongPassphrase))
    }
}

/// Storage failures surface as `SealboxError::Storage` with the path attached.
pub(crate) fn storage_err(action: &str, path: &str, e: opendal::Error) -> VaultError {
    VaultError::Core(SealboxError::Storage(format!("{action} {path}: {e}")))
}
