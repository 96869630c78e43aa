//! Client chain state: keyword → current head token.
//!
//! Head updates are per-keyword compare-and-swap, so concurrent `tag` calls
//! in one session never lose a link. Sessions that do not share a
//! `ChainState` can still diverge from a common old head; the vault detects
//! that at persist time through the index-state generation counter.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sealbox_core::Record;
use sealbox_crypto::{decrypt, encrypt, Envelope, MasterKey, SearchKey};

use crate::chain::{ChainEntry, Token};
use crate::error::{IndexError, IndexResult};

/// Trim and lower-case a keyword. Returns `None` for blank input.
pub fn normalize_keyword(keyword: &str) -> Option<String> {
    let kw = keyword.trim().to_lowercase();
    (!kw.is_empty()).then_some(kw)
}

/// Normalize a keyword list, dropping blanks and duplicates (first wins).
pub fn normalize_keywords<S: AsRef<str>>(keywords: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keywords.len());
    for kw in keywords.iter().filter_map(|k| normalize_keyword(k.as_ref())) {
        if !out.contains(&kw) {
            out.push(kw);
        }
    }
    out
}

/// Serialized form of the head map, sealed under Km as one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ChainHeads {
    heads: BTreeMap<String, Token>,
}

impl Record for ChainHeads {
    const KIND: &'static str = "chain_state";
}

/// One keyword advanced by a [`ChainState::tag`] call.
#[derive(Debug, Clone)]
pub struct TagLink {
    pub keyword: String,
    /// Head before this tag; equal to `entry.prev_token`.
    pub previous: Option<Token>,
    pub entry: ChainEntry,
}

/// The entries produced by tagging one file, ready for upload.
#[derive(Debug, Clone, Default)]
pub struct TagBatch {
    pub file_id: String,
    pub links: Vec<TagLink>,
}

impl TagBatch {
    pub fn entries(&self) -> impl Iterator<Item = &ChainEntry> {
        self.links.iter().map(|l| &l.entry)
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }
}

#[derive(Debug, Default)]
pub struct ChainState {
    heads: RwLock<BTreeMap<String, Token>>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self, keyword: &str) -> Option<Token> {
        let kw = normalize_keyword(keyword)?;
        self.heads.read().get(&kw).copied()
    }

    /// Snapshot of every keyword head.
    pub fn heads(&self) -> BTreeMap<String, Token> {
        self.heads.read().clone()
    }

    pub fn len(&self) -> usize {
        self.heads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.read().is_empty()
    }

    /// Set `keyword`'s head to `new` only if it currently equals `expected`.
    /// `None` means "no chain". The keyword is normalized like in
    /// [`ChainState::head`]; a blank keyword never swaps. Returns whether
    /// the swap happened.
    pub fn compare_and_swap(
        &self,
        keyword: &str,
        expected: Option<Token>,
        new: Option<Token>,
    ) -> bool {
        let Some(kw) = normalize_keyword(keyword) else {
            return false;
        };
        let mut heads = self.heads.write();
        if heads.get(&kw).copied() != expected {
            return false;
        }
        match new {
            Some(token) => heads.insert(kw, token),
            None => heads.remove(&kw),
        };
        true
    }

    /// Append one entry per keyword for `file_id`, advancing each head.
    ///
    /// Entries are built outside the lock; a head that moved in the
    /// meantime makes that keyword retry against the new head.
    pub fn tag<S: AsRef<str>>(
        &self,
        file_id: &str,
        keywords: &[S],
        search_key: &SearchKey,
    ) -> IndexResult<TagBatch> {
        let mut batch = TagBatch {
            file_id: file_id.to_string(),
            links: Vec::new(),
        };

        for keyword in normalize_keywords(keywords) {
            loop {
                let previous = self.heads.read().get(&keyword).copied();
                let entry = ChainEntry::seal(file_id, search_key, previous)?;
                if self.compare_and_swap(&keyword, previous, Some(entry.token)) {
                    batch.links.push(TagLink {
                        keyword,
                        previous,
                        entry,
                    });
                    break;
                }
                debug!(keyword = %keyword, "chain head moved during tag, retrying");
            }
        }

        Ok(batch)
    }

    /// Undo the head advances of a batch whose entries never reached
    /// storage. Returns how many keywords were restored.
    ///
    /// A keyword whose head has since moved again is left alone: its chain
    /// now runs through an entry that was never stored, so a walk from that
    /// head stops there with `MissingLink` and older entries are
    /// unreachable.
    pub fn rollback(&self, batch: &TagBatch) -> usize {
        let mut restored = 0;
        for link in batch.links.iter().rev() {
            if self.compare_and_swap(&link.keyword, Some(link.entry.token), link.previous) {
                restored += 1;
            } else {
                warn!(
                    file_id = %batch.file_id,
                    "chain head advanced past an unstored entry; rollback skipped"
                );
            }
        }
        restored
    }

    /// Serialize the head map and seal it under Km.
    pub fn seal(&self, master_key: &MasterKey) -> IndexResult<Envelope> {
        let snapshot = ChainHeads {
            heads: self.heads(),
        };
        let bytes = sealbox_core::encode(&snapshot)
            .map_err(|e| IndexError::State(format!("encoding chain state: {e}")))?;
        Ok(encrypt(&bytes, master_key.as_bytes())?)
    }

    /// Inverse of [`ChainState::seal`].
    pub fn open(sealed: &Envelope, master_key: &MasterKey) -> IndexResult<Self> {
        let bytes = decrypt(sealed, master_key.as_bytes())?;
        let snapshot: ChainHeads = sealbox_core::decode(&bytes)
            .map_err(|e| IndexError::State(format!("decoding chain state: {e}")))?;
        Ok(Self {
            heads: RwLock::new(snapshot.heads),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealbox_crypto::CryptoError;
    use std::sync::Arc;

    #[test]
    fn test_normalize_keywords() {
        let kws = normalize_keywords(&["  Report", "report", "", "   ", "2024", "REPORT "]);
        assert_eq!(kws, vec!["report".to_string(), "2024".to_string()]);
    }

    #[test]
    fn test_first_tag_has_no_prev() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();

        let batch = state.tag("f1", &["report"], &ks).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.links[0].entry.prev_token.is_none());
        assert_eq!(state.head("report"), Some(batch.links[0].entry.token));
    }

    #[test]
    fn test_tag_links_to_previous_head() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();

        let first = state.tag("f1", &["report"], &ks).unwrap();
        let second = state.tag("f2", &["Report"], &ks).unwrap();

        let first_token = first.links[0].entry.token;
        assert_eq!(second.links[0].entry.prev_token, Some(first_token));
        assert_eq!(second.links[0].previous, Some(first_token));
        assert_eq!(state.head("report"), Some(second.links[0].entry.token));
    }

    #[test]
    fn test_tag_skips_blank_keywords() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();

        let batch = state.tag("f1", &["", "  "], &ks).unwrap();
        assert!(batch.is_empty());
        assert!(state.is_empty());
    }

    #[test]
    fn test_compare_and_swap() {
        let state = ChainState::new();
        let t1 = Token::generate().unwrap();
        let t2 = Token::generate().unwrap();

        assert!(state.compare_and_swap("kw", None, Some(t1)));
        assert!(!state.compare_and_swap("kw", None, Some(t2)));
        assert!(!state.compare_and_swap("kw", Some(t2), None));
        assert!(state.compare_and_swap("kw", Some(t1), Some(t2)));
        assert_eq!(state.head("kw"), Some(t2));
        assert!(state.compare_and_swap("kw", Some(t2), None));
        assert!(state.head("kw").is_none());
    }

    #[test]
    fn test_compare_and_swap_normalizes_keyword() {
        let state = ChainState::new();
        let t1 = Token::generate().unwrap();
        let t2 = Token::generate().unwrap();

        assert!(state.compare_and_swap(" Report", None, Some(t1)));
        assert_eq!(state.head("report"), Some(t1));
        assert_eq!(state.head("REPORT"), Some(t1));
        assert!(state.compare_and_swap("REPORT", Some(t1), Some(t2)));
        assert_eq!(state.heads().len(), 1);
        assert!(!state.compare_and_swap("   ", None, Some(t1)));
    }

    #[test]
    fn test_rollback_restores_heads() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        state.tag("f1", &["report"], &ks).unwrap();
        let before = state.heads();

        let batch = state.tag("f2", &["report", "2024"], &ks).unwrap();
        assert_eq!(state.rollback(&batch), 2);
        assert_eq!(state.heads(), before);
    }

    #[test]
    fn test_rollback_leaves_moved_head() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();

        let failed = state.tag("f1", &["report"], &ks).unwrap();
        let later = state.tag("f2", &["report"], &ks).unwrap();

        assert_eq!(state.rollback(&failed), 0);
        assert_eq!(state.head("report"), Some(later.links[0].entry.token));
    }

    #[test]
    fn test_concurrent_tags_form_one_chain() {
        let ks = Arc::new(SearchKey::generate().unwrap());
        let state = Arc::new(ChainState::new());

        let batches: Vec<TagBatch> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let ks = Arc::clone(&ks);
                    let state = Arc::clone(&state);
                    s.spawn(move || state.tag(&format!("f{i}"), &["shared"], &ks).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Every entry's prev must be some other entry's token, except exactly one root.
        let entries: Vec<&ChainEntry> = batches.iter().flat_map(|b| b.entries()).collect();
        let roots = entries.iter().filter(|e| e.prev_token.is_none()).count();
        assert_eq!(roots, 1);

        let mut prevs: Vec<Token> = entries.iter().filter_map(|e| e.prev_token).collect();
        prevs.sort();
        prevs.dedup();
        assert_eq!(prevs.len(), entries.len() - 1, "no two entries share a prev");
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let ks = SearchKey::generate().unwrap();
        let km = MasterKey::generate().unwrap();
        let state = ChainState::new();
        state.tag("f1", &["report", "2024"], &ks).unwrap();

        let sealed = state.seal(&km).unwrap();
        let restored = ChainState::open(&sealed, &km).unwrap();
        assert_eq!(restored.heads(), state.heads());
    }

    #[test]
    fn test_open_wrong_master_key() {
        let km = MasterKey::generate().unwrap();
        let other = MasterKey::generate().unwrap();
        let sealed = ChainState::new().seal(&km).unwrap();

        assert!(matches!(
            ChainState::open(&sealed, &other),
            Err(IndexError::Crypto(CryptoError::Authentication))
        ));
    }
}
