//! sealbox-core: shared record schemas, configuration, and error types

pub mod config;
pub mod error;
pub mod records;

pub use config::SealboxConfig;
pub use error::{SealboxError, SealboxResult};
pub use records::{
    decode, encode, unix_now, FileMetadata, FileRecord, IndexStateRecord, KeyGrant, Permission,
    Record, ShareRecord, UserRecord,
};
