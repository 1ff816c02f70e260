//! Per (document, peer) sync state storage.

use std::collections::HashMap;

use super::{DocId, PeerId};

/// Sync states keyed by document, then by peer.
///
/// A state only changes through [`SyncStateStore::set`]. States are created
/// lazily the first time a pair is addressed.
#[derive(Debug, Clone)]
pub struct SyncStateStore<S> {
    states: HashMap<DocId, HashMap<PeerId, S>>,
}

impl<S> SyncStateStore<S> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// Returns the state for a pair, creating and storing one with `init`
    /// on first reference.
    pub fn get(&mut self, doc_id: &str, peer_id: &str, init: impl FnOnce() -> S) -> &S {
        self.states
            .entry(doc_id.to_string())
            .or_default()
            .entry(peer_id.to_string())
            .or_insert_with(init)
    }

    /// Overwrites the state for a pair.
    pub fn set(&mut self, doc_id: &str, peer_id: &str, state: S) {
        self.states
            .entry(doc_id.to_string())
            .or_default()
            .insert(peer_id.to_string(), state);
    }

    /// Returns true if a state exists for the pair.
    pub fn contains(&self, doc_id: &str, peer_id: &str) -> bool {
        self.states
            .get(doc_id)
            .is_some_and(|peers| peers.contains_key(peer_id))
    }

    /// Lists peers holding a state for a document.
    pub fn peers(&self, doc_id: &str) -> Vec<&str> {
        let mut peers: Vec<&str> = self
            .states
            .get(doc_id)
            .map(|peers| peers.keys().map(String::as_str).collect())
            .unwrap_or_default();
        peers.sort_unstable();
        peers
    }

    /// Drops every state for a document.
    pub fn remove_document(&mut self, doc_id: &str) {
        self.states.remove(doc_id);
    }

    /// Drops a peer's states across all documents.
    pub fn forget_peer(&mut self, peer_id: &str) {
        for peers in self.states.values_mut() {
            peers.remove(peer_id);
        }
        self.states.retain(|_, peers| !peers.is_empty());
    }
}

impl<S> Default for SyncStateStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_creates_lazily() {
        let mut store: SyncStateStore<u32> = SyncStateStore::new();
        assert!(!store.contains("doc", "peer"));

        assert_eq!(*store.get("doc", "peer", || 7), 7);
        assert!(store.contains("doc", "peer"));

        // Existing state wins over the initializer
        assert_eq!(*store.get("doc", "peer", || 99), 7);
    }

    #[test]
    fn test_set_overwrites() {
        let mut store = SyncStateStore::new();
        store.set("doc", "peer", 1);
        store.set("doc", "peer", 2);
        assert_eq!(*store.get("doc", "peer", || 0), 2);
    }

    #[test]
    fn test_pairs_are_independent() {
        let mut store = SyncStateStore::new();
        store.set("a", "p1", 1);
        store.set("a", "p2", 2);
        store.set("b", "p1", 3);

        assert_eq!(*store.get("a", "p1", || 0), 1);
        assert_eq!(*store.get("a", "p2", || 0), 2);
        assert_eq!(*store.get("b", "p1", || 0), 3);
        assert_eq!(store.peers("a"), vec!["p1", "p2"]);
    }

    #[test]
    fn test_remove_document() {
        let mut store = SyncStateStore::new();
        store.set("a", "p1", 1);
        store.set("b", "p1", 2);

        store.remove_document("a");
        assert!(!store.contains("a", "p1"));
        assert!(store.contains("b", "p1"));
    }

    #[test]
    fn test_forget_peer() {
        let mut store = SyncStateStore::new();
        store.set("a", "p1", 1);
        store.set("a", "p2", 2);
        store.set("b", "p1", 3);

        store.forget_peer("p1");
        assert!(!store.contains("a", "p1"));
        assert!(!store.contains("b", "p1"));
        assert!(store.contains("a", "p2"));
        assert!(store.peers("b").is_empty());
    }
}
