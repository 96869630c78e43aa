//! Hop-bounded chain traversal and keyword search.
//!
//! The walk runs over a [`ChainLookup`], the only thing the index needs from
//! the storage collaborator: "give me the entry stored under this token".

use std::collections::{HashMap, HashSet};
use std::future::Future;

use parking_lot::RwLock;
use tracing::{debug, warn};

use sealbox_crypto::{Envelope, SearchKey};

use crate::chain::{ChainEntry, Token};
use crate::error::{ChainInconsistency, IndexError, IndexResult};
use crate::state::{normalize_keyword, ChainState};

/// Read access to stored chain entries, addressed by token.
pub trait ChainLookup: Send + Sync {
    /// `Ok(None)` when nothing is stored under `token`.
    fn entry(
        &self,
        token: &Token,
    ) -> impl Future<Output = IndexResult<Option<ChainEntry>>> + Send;
}

/// In-memory entry store keyed by token. Entries are write-once.
#[derive(Debug, Default)]
pub struct ChainArena {
    entries: RwLock<HashMap<Token, ChainEntry>>,
}

impl ChainArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: ChainEntry) -> IndexResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.token) {
            return Err(IndexError::TokenExists(entry.token));
        }
        entries.insert(entry.token, entry);
        Ok(())
    }

    pub fn get(&self, token: &Token) -> Option<ChainEntry> {
        self.entries.read().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ChainLookup for ChainArena {
    async fn entry(&self, token: &Token) -> IndexResult<Option<ChainEntry>> {
        Ok(self.get(token))
    }
}

/// Values collected by one traversal, newest first.
#[derive(Debug, Clone, Default)]
pub struct Walk {
    pub values: Vec<Envelope>,
    pub hops: usize,
    /// Set when the walk ended on anything other than a null `prev_token`.
    pub anomaly: Option<ChainInconsistency>,
}

/// Follow `prev_token` links from `head`, collecting values.
///
/// Stops at a null link, an unknown token, a revisited token, or after
/// `max_hops` entries. Everything collected before the stop is returned.
pub async fn walk<L: ChainLookup>(
    lookup: &L,
    head: Token,
    max_hops: usize,
) -> IndexResult<Walk> {
    let mut out = Walk::default();
    let mut visited = HashSet::new();
    let mut cursor = Some(head);

    while let Some(token) = cursor {
        if !visited.insert(token) {
            out.anomaly = Some(ChainInconsistency::Cycle(token));
            break;
        }
        if out.hops >= max_hops {
            out.anomaly = Some(ChainInconsistency::HopLimit(max_hops));
            break;
        }

        let Some(entry) = lookup.entry(&token).await? else {
            out.anomaly = Some(if token == head {
                ChainInconsistency::UnknownHead(token)
            } else {
                ChainInconsistency::MissingLink(token)
            });
            break;
        };

        out.values.push(entry.value);
        out.hops += 1;
        cursor = entry.prev_token;
    }

    Ok(out)
}

/// File ids recovered from chain values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    /// Deduplicated, in traversal order
    pub file_ids: Vec<String>,
    /// Values that did not open under Ks
    pub undecryptable: usize,
}

/// Decrypt chain values with Ks.
pub fn resolve(values: &[Envelope], search_key: &SearchKey) -> Resolved {
    let mut out = Resolved::default();
    let mut seen = HashSet::new();

    for value in values {
        match ChainEntry::open(value, search_key) {
            Ok(id) => {
                if seen.insert(id.clone()) {
                    out.file_ids.push(id);
                }
            }
            Err(e) => {
                debug!("skipping chain value: {e}");
                out.undecryptable += 1;
            }
        }
    }

    out
}

/// Result of a keyword search. Ids may be stale: deleting a file does not
/// unlink its chain entries.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub file_ids: Vec<String>,
    pub hops: usize,
    pub undecryptable: usize,
    pub anomaly: Option<ChainInconsistency>,
}

/// Search one keyword. Returns empty, without touching `lookup`, when the
/// keyword has no local head. The keyword itself never leaves this function.
pub async fn search<L: ChainLookup>(
    state: &ChainState,
    lookup: &L,
    keyword: &str,
    search_key: &SearchKey,
    max_hops: usize,
) -> IndexResult<SearchOutcome> {
    let Some(head) = normalize_keyword(keyword).and_then(|kw| state.head(&kw)) else {
        return Ok(SearchOutcome::default());
    };

    let walked = walk(lookup, head, max_hops).await?;
    if let Some(anomaly) = &walked.anomaly {
        warn!(hops = walked.hops, "keyword chain traversal stopped early: {anomaly}");
    }

    let resolved = resolve(&walked.values, search_key);
    if resolved.undecryptable > 0 {
        warn!(
            count = resolved.undecryptable,
            "chain values did not decrypt under the search key"
        );
    }

    Ok(SearchOutcome {
        file_ids: resolved.file_ids,
        hops: walked.hops,
        undecryptable: resolved.undecryptable,
        anomaly: walked.anomaly,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOPS: usize = 100;

    fn store(arena: &ChainArena, state: &ChainState, file_id: &str, kws: &[&str], ks: &SearchKey) {
        let batch = state.tag(file_id, kws, ks).unwrap();
        for entry in batch.entries() {
            arena.insert(entry.clone()).unwrap();
        }
    }

    /// Counts lookups so tests can assert none were made.
    #[derive(Default)]
    struct Counting {
        inner: ChainArena,
        calls: AtomicUsize,
    }

    impl ChainLookup for Counting {
        async fn entry(&self, token: &Token) -> IndexResult<Option<ChainEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.inner.get(token))
        }
    }

    #[tokio::test]
    async fn test_search_returns_all_tagged_files() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let arena = ChainArena::new();

        for i in 0..5 {
            store(&arena, &state, &format!("f{i}"), &["report"], &ks);
        }

        let outcome = search(&state, &arena, "report", &ks, HOPS).await.unwrap();
        let mut ids = outcome.file_ids.clone();
        ids.sort();
        assert_eq!(ids, vec!["f0", "f1", "f2", "f3", "f4"]);
        assert_eq!(outcome.hops, 5);
        assert!(outcome.anomaly.is_none());
        // Newest first
        assert_eq!(outcome.file_ids[0], "f4");
    }

    #[tokio::test]
    async fn test_disjoint_keywords_do_not_leak() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let arena = ChainArena::new();

        store(&arena, &state, "f1", &["kw1"], &ks);
        store(&arena, &state, "f2", &["kw2"], &ks);

        let outcome = search(&state, &arena, "kw1", &ks, HOPS).await.unwrap();
        assert_eq!(outcome.file_ids, vec!["f1"]);
    }

    #[tokio::test]
    async fn test_unknown_keyword_makes_no_lookup() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let lookup = Counting::default();

        let outcome = search(&state, &lookup, "nonexistent", &ks, HOPS).await.unwrap();
        assert!(outcome.file_ids.is_empty());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_normalizes_keyword() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let arena = ChainArena::new();
        store(&arena, &state, "f1", &["Report"], &ks);

        let outcome = search(&state, &arena, "  REPORT ", &ks, HOPS).await.unwrap();
        assert_eq!(outcome.file_ids, vec!["f1"]);
    }

    #[tokio::test]
    async fn test_unknown_head_is_empty_with_diagnostic() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let arena = ChainArena::new();
        // Head advanced locally but entries never stored
        state.tag("f1", &["report"], &ks).unwrap();

        let outcome = search(&state, &arena, "report", &ks, HOPS).await.unwrap();
        assert!(outcome.file_ids.is_empty());
        assert!(matches!(
            outcome.anomaly,
            Some(ChainInconsistency::UnknownHead(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_link_keeps_partial_results() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let arena = ChainArena::new();

        state.tag("f1", &["kw"], &ks).unwrap(); // never stored
        store(&arena, &state, "f2", &["kw"], &ks);

        let outcome = search(&state, &arena, "kw", &ks, HOPS).await.unwrap();
        assert_eq!(outcome.file_ids, vec!["f2"]);
        assert!(matches!(
            outcome.anomaly,
            Some(ChainInconsistency::MissingLink(_))
        ));
    }

    #[tokio::test]
    async fn test_cycle_is_detected() {
        let ks = SearchKey::generate().unwrap();
        let arena = ChainArena::new();
        let a = Token::generate().unwrap();
        let b = Token::generate().unwrap();

        let mut ea = ChainEntry::seal("fa", &ks, Some(b)).unwrap();
        ea.token = a;
        let mut eb = ChainEntry::seal("fb", &ks, Some(a)).unwrap();
        eb.token = b;
        arena.insert(ea).unwrap();
        arena.insert(eb).unwrap();

        let walked = walk(&arena, a, HOPS).await.unwrap();
        assert_eq!(walked.values.len(), 2);
        assert_eq!(walked.anomaly, Some(ChainInconsistency::Cycle(a)));
    }

    #[tokio::test]
    async fn test_hop_limit_bounds_traversal() {
        let ks = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let arena = ChainArena::new();
        for i in 0..10 {
            store(&arena, &state, &format!("f{i}"), &["kw"], &ks);
        }

        let outcome = search(&state, &arena, "kw", &ks, 3).await.unwrap();
        assert_eq!(outcome.file_ids.len(), 3);
        assert_eq!(outcome.anomaly, Some(ChainInconsistency::HopLimit(3)));
    }

    #[tokio::test]
    async fn test_foreign_values_are_counted_not_returned() {
        let ks = SearchKey::generate().unwrap();
        let other = SearchKey::generate().unwrap();
        let state = ChainState::new();
        let arena = ChainArena::new();

        store(&arena, &state, "mine", &["kw"], &ks);
        let head = state.head("kw");
        let foreign = ChainEntry::seal("theirs", &other, head).unwrap();
        assert!(state.compare_and_swap("kw", head, Some(foreign.token)));
        arena.insert(foreign).unwrap();

        let outcome = search(&state, &arena, "kw", &ks, HOPS).await.unwrap();
        assert_eq!(outcome.file_ids, vec!["mine"]);
        assert_eq!(outcome.undecryptable, 1);
    }

    #[test]
    fn test_arena_rejects_duplicate_token() {
        let ks = SearchKey::generate().unwrap();
        let arena = ChainArena::new();
        let entry = ChainEntry::seal("f", &ks, None).unwrap();

        arena.insert(entry.clone()).unwrap();
        assert!(matches!(
            arena.insert(entry),
            Err(IndexError::TokenExists(_))
        ));
        assert_eq!(arena.len(), 1);
    }
}
