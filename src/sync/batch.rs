//! Batches of per-document sync messages.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DocId;

/// Sync messages for several documents, exchanged in one round.
///
/// Entries are keyed by document id. A batch never holds two messages for
/// the same document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch<M> {
    messages: BTreeMap<DocId, M>,
}

impl<M> Batch<M> {
    pub fn new() -> Self {
        Self {
            messages: BTreeMap::new(),
        }
    }

    /// Adds a message, returning the one it replaced.
    pub fn insert(&mut self, doc_id: impl Into<DocId>, message: M) -> Option<M> {
        self.messages.insert(doc_id.into(), message)
    }

    pub fn get(&self, doc_id: &str) -> Option<&M> {
        self.messages.get(doc_id)
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.messages.contains_key(doc_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &M)> {
        self.messages.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<M> Default for Batch<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> IntoIterator for Batch<M> {
    type Item = (DocId, M);
    type IntoIter = btree_map::IntoIter<DocId, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<M, K: Into<DocId>> FromIterator<(K, M)> for Batch<M> {
    fn from_iter<I: IntoIterator<Item = (K, M)>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().map(|(k, m)| (k.into(), m)).collect(),
        }
    }
}
