//! sealbox-vault: the client side of a zero-knowledge file vault
//!
//! A [`Vault`] drives every exposed operation against a [`VaultStore`]
//! (any OpenDAL backend). Each operation takes the caller's [`Session`],
//! which carries the unlocked key hierarchy and keyword chain heads; no
//! key material or chain state is held anywhere else.

pub mod error;
pub mod session;
pub mod store;
pub mod vault;

pub use error::{VaultError, VaultResult};
pub use session::Session;
pub use store::{build_operator, VaultStore};
pub use vault::{Access, Download, FileView, NewFile, SearchResults, Vault};
