use sealbox_crypto::CryptoError;
use thiserror::Error;

use crate::chain::Token;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("chain token already exists: {0}")]
    TokenExists(Token),

    #[error("chain lookup failed: {0}")]
    Lookup(String),

    #[error("index state error: {0}")]
    State(String),
}

/// Why a traversal stopped early. Attached to a search result as a
/// diagnostic; a traversal never fails or loops because of one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainInconsistency {
    #[error("head token {0} is not known to the server")]
    UnknownHead(Token),

    #[error("entry {0} is missing from the chain")]
    MissingLink(Token),

    #[error("chain revisits token {0}")]
    Cycle(Token),

    #[error("traversal stopped after {0} hops")]
    HopLimit(usize),
}
