//! Per-login session context.
//!
//! Everything that used to be ambient client state lives here: the key
//! hierarchy (with its Locked/Unlocked tag) and the keyword chain heads.
//! One `Session` per login; drop or [`Session::clear`] it on logout.

use std::sync::atomic::{AtomicBool, Ordering};

use sealbox_crypto::{CryptoResult, KeyHierarchy, UnlockedKeys};
use sealbox_index::ChainState;

#[derive(Debug)]
pub struct Session {
    user: String,
    pub(crate) keys: KeyHierarchy,
    pub(crate) chains: ChainState,
    /// Generation of the index-state blob this session's heads came from.
    pub(crate) index_generation: u64,
    index_dirty: AtomicBool,
}

impl Session {
    pub(crate) fn new(user: &str, keys: KeyHierarchy) -> Self {
        Self {
            user: user.to_string(),
            keys,
            chains: ChainState::new(),
            index_generation: 0,
            index_dirty: AtomicBool::new(false),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_unlocked(&self) -> bool {
        self.keys.is_unlocked()
    }

    pub fn keys(&self) -> CryptoResult<&UnlockedKeys> {
        self.keys.keys()
    }

    pub fn chains(&self) -> &ChainState {
        &self.chains
    }

    pub fn index_generation(&self) -> u64 {
        self.index_generation
    }

    /// True when chain heads moved since the last load or persist.
    pub fn is_index_dirty(&self) -> bool {
        self.index_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_index_dirty(&self, dirty: bool) {
        self.index_dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn replace_chains(&mut self, chains: ChainState, generation: u64) {
        self.chains = chains;
        self.index_generation = generation;
        self.set_index_dirty(false);
    }

    /// Wipe keys and chain heads. The session stays usable only for
    /// reporting its user name.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.replace_chains(ChainState::new(), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealbox_crypto::{CryptoError, SearchKey};

    #[test]
    fn test_new_session_from_locked_keys() {
        let session = Session::new("alice", KeyHierarchy::new());
        assert_eq!(session.user(), "alice");
        assert!(!session.is_unlocked());
        assert!(matches!(session.keys(), Err(CryptoError::Locked)));
        assert!(!session.is_index_dirty());
    }

    #[test]
    fn test_clear_wipes_chain_heads() {
        let mut session = Session::new("alice", KeyHierarchy::new());
        let ks = SearchKey::generate().unwrap();
        session.chains().tag("f1", &["report"], &ks).unwrap();
        session.index_generation = 4;
        session.set_index_dirty(true);

        session.clear();
        assert!(session.chains().is_empty());
        assert_eq!(session.index_generation(), 0);
        assert!(!session.is_index_dirty());
    }
}
