//! sealbox-index: searchable encryption over per-keyword token chains
//!
//! Each keyword owns an append-only linked list of entries stored by the
//! server under random 128-bit tokens:
//! ```text
//! head ──> E_n(token_n, Enc_Ks(file_id_n), prev=token_{n-1}) ──> ... ──> E_1(prev=null)
//! ```
//! Tokens carry no information about the keyword, so the server only learns
//! which entries belong together when a client hands it a head to walk from.
//! Heads live in [`ChainState`], which is persisted sealed under Km.

pub mod chain;
pub mod error;
pub mod search;
pub mod state;

pub use chain::{ChainEntry, Token, TOKEN_SIZE};
pub use error::{ChainInconsistency, IndexError, IndexResult};
pub use search::{resolve, search, walk, ChainArena, ChainLookup, Resolved, SearchOutcome, Walk};
pub use state::{normalize_keyword, normalize_keywords, ChainState, TagBatch, TagLink};

/// Default upper bound on entries visited by a single traversal
pub const DEFAULT_MAX_HOPS: usize = 10_000;
