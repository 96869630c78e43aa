use thiserror::Error;

pub type SealboxResult<T> = Result<T, SealboxError>;

#[derive(Debug, Error)]
pub enum SealboxError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("malformed record: {0}")]
    Record(String),

    #[error("unsupported record: kind {kind:?} version {version}")]
    UnsupportedRecord { kind: String, version: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
