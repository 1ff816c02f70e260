//! Document registry.
//!
//! Owns a set of named documents and, for each of them, the sync state of
//! every peer it has exchanged messages with. All calls into the engine go
//! through here.

use std::collections::btree_map;
use std::collections::BTreeMap;

use tokio::sync::broadcast;

use super::batch::Batch;
use super::error::SyncError;
use super::state::SyncStateStore;
use super::DocId;
use crate::engine::{Engine, EngineError};

/// Buffer size of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Created with default content, locally or by an incoming message.
    Created,
    /// Replaced wholesale.
    Replaced,
    /// Mutated in place by a local edit.
    Updated,
    /// Changed by a message from a peer.
    Received,
    /// Removed from the registry.
    Removed,
}

/// Change notification raised by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChanged {
    pub doc_id: DocId,
    pub kind: ChangeKind,
}

/// Result of generating messages for one peer.
#[derive(Debug)]
pub struct Outgoing<M> {
    /// Messages to send. Empty when the peer is caught up.
    pub batch: Batch<M>,
    /// Documents the engine could not generate for.
    pub failures: Vec<SyncError>,
}

impl<M> Default for Outgoing<M> {
    fn default() -> Self {
        Self {
            batch: Batch::new(),
            failures: Vec::new(),
        }
    }
}

/// Result of applying a batch from one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Documents whose message was applied.
    pub applied: Vec<DocId>,
    /// Documents created because the batch referenced them first.
    pub created: Vec<DocId>,
    /// Applied documents whose content changed.
    pub changed: Vec<DocId>,
    /// Entries that failed. Their documents and sync states are untouched.
    pub failures: Vec<SyncError>,
}

impl ApplyReport {
    /// Returns true if every entry was applied.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Entry<D> {
    doc: D,
    /// Set once the engine reports an invariant violation.
    unusable: Option<String>,
}

impl<D> Entry<D> {
    fn new(doc: D) -> Self {
        Self { doc, unusable: None }
    }
}

/// Registry of documents and their per-peer sync states.
///
/// Creating a document under an existing id replaces it and resets its sync
/// states: the last write wins. Use [`Registry::contains`] first when that
/// is not wanted.
pub struct Registry<E: Engine> {
    engine: E,
    documents: BTreeMap<DocId, Entry<E::Document>>,
    sync_states: SyncStateStore<E::SyncState>,
    changes: broadcast::Sender<DocumentChanged>,
}

impl<E: Engine> Registry<E> {
    pub fn new(engine: E) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            engine,
            documents: BTreeMap::new(),
            sync_states: SyncStateStore::new(),
            changes,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentChanged> {
        self.changes.subscribe()
    }

    /// Creates a document with default content and returns a copy of it.
    ///
    /// The copy is detached: editing it leaves the stored document alone
    /// until it is handed back with [`Registry::set_document`]. Use
    /// [`Registry::update_document`] to edit the stored document in place.
    ///
    /// Any document already stored under `doc_id` is replaced along with its
    /// sync states.
    pub fn create_document(&mut self, doc_id: impl Into<DocId>) -> E::Document {
        let doc_id = doc_id.into();
        let doc = self.engine.init();

        self.sync_states.remove_document(&doc_id);
        self.documents.insert(doc_id.clone(), Entry::new(doc.clone()));

        tracing::debug!("Created document {}", doc_id);
        self.emit(doc_id, ChangeKind::Created);
        doc
    }

    pub fn get_document(&self, doc_id: &str) -> Option<&E::Document> {
        self.documents.get(doc_id).map(|entry| &entry.doc)
    }

    /// Replaces a document wholesale, keeping its sync states.
    ///
    /// This also clears an unusable mark left by an engine failure.
    pub fn set_document(&mut self, doc_id: impl Into<DocId>, doc: E::Document) {
        let doc_id = doc_id.into();
        match self.documents.get_mut(&doc_id) {
            Some(entry) => {
                entry.doc = doc;
                entry.unusable = None;
            }
            None => {
                self.documents.insert(doc_id.clone(), Entry::new(doc));
            }
        }
        self.emit(doc_id, ChangeKind::Replaced);
    }

    /// Mutates a stored document in place and raises a change notification.
    ///
    /// Returns `None` if there is no such document.
    pub fn update_document<R>(
        &mut self,
        doc_id: &str,
        f: impl FnOnce(&mut E::Document) -> R,
    ) -> Option<R> {
        let entry = self.documents.get_mut(doc_id)?;
        let result = f(&mut entry.doc);
        self.emit(doc_id.to_string(), ChangeKind::Updated);
        Some(result)
    }

    /// Removes a document and its sync states.
    pub fn remove_document(&mut self, doc_id: &str) -> Option<E::Document> {
        let entry = self.documents.remove(doc_id)?;
        self.sync_states.remove_document(doc_id);
        self.emit(doc_id.to_string(), ChangeKind::Removed);
        Some(entry.doc)
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.documents.contains_key(doc_id)
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns true if the engine refused to operate on the document.
    pub fn is_unusable(&self, doc_id: &str) -> bool {
        self.documents
            .get(doc_id)
            .is_some_and(|entry| entry.unusable.is_some())
    }

    /// Lists peers with a sync state for the document.
    pub fn sync_peers(&self, doc_id: &str) -> Vec<&str> {
        self.sync_states.peers(doc_id)
    }

    /// Drops every sync state held for a peer.
    ///
    /// The next exchange with that peer starts from scratch.
    pub fn forget_peer(&mut self, peer_id: &str) {
        self.sync_states.forget_peer(peer_id);
    }

    /// Generates the next message of every document for a peer.
    ///
    /// Sync states are stored even when a document has nothing to send. An
    /// empty batch means the peer is caught up.
    pub fn generate_outgoing_messages(&mut self, peer_id: &str) -> Outgoing<E::Message> {
        let mut outgoing = Outgoing::default();
        let engine = &self.engine;

        for (doc_id, entry) in self.documents.iter_mut() {
            if entry.unusable.is_some() {
                continue;
            }

            let mut state = self
                .sync_states
                .get(doc_id, peer_id, || engine.init_sync_state())
                .clone();

            match engine.generate(&mut entry.doc, &mut state) {
                Ok(message) => {
                    self.sync_states.set(doc_id, peer_id, state);
                    if let Some(message) = message {
                        outgoing.batch.insert(doc_id.clone(), message);
                    }
                }
                Err(err) => outgoing.failures.push(fail(doc_id, entry, err)),
            }
        }

        if !outgoing.batch.is_empty() {
            tracing::debug!(
                "Generated {} message(s) for peer {}",
                outgoing.batch.len(),
                peer_id
            );
        }
        outgoing
    }

    /// Applies a batch of messages from a peer.
    ///
    /// Documents the registry has never seen are created first. Each entry is
    /// applied on its own: a failing entry leaves its document and sync state
    /// as they were and does not stop the others.
    pub fn apply_incoming_messages(
        &mut self,
        peer_id: &str,
        batch: Batch<E::Message>,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let engine = &self.engine;
        let total = batch.len();

        for (doc_id, message) in batch {
            let entry = match self.documents.entry(doc_id.clone()) {
                btree_map::Entry::Occupied(occupied) => occupied.into_mut(),
                btree_map::Entry::Vacant(vacant) => {
                    report.created.push(doc_id.clone());
                    vacant.insert(Entry::new(engine.init()))
                }
            };

            if let Some(reason) = &entry.unusable {
                report.failures.push(SyncError::DocumentUnusable {
                    doc_id,
                    reason: reason.clone(),
                });
                continue;
            }

            let before = engine.version(&mut entry.doc);
            let mut doc = entry.doc.clone();
            let mut state = self
                .sync_states
                .get(&doc_id, peer_id, || engine.init_sync_state())
                .clone();

            match engine.receive(&mut doc, &mut state, message) {
                Ok(()) => {
                    if engine.version(&mut doc) != before {
                        report.changed.push(doc_id.clone());
                    }
                    entry.doc = doc;
                    self.sync_states.set(&doc_id, peer_id, state);
                    report.applied.push(doc_id);
                }
                Err(err) => report.failures.push(fail(&doc_id, entry, err)),
            }
        }

        tracing::debug!(
            "Applied {} of {} message(s) from peer {} ({} changed)",
            report.applied.len(),
            total,
            peer_id,
            report.changed.len()
        );

        for doc_id in &report.changed {
            self.emit(doc_id.clone(), ChangeKind::Received);
        }
        for doc_id in &report.created {
            if !report.changed.contains(doc_id) {
                self.emit(doc_id.clone(), ChangeKind::Created);
            }
        }
        report
    }

    /// Serializes a document through the engine.
    pub fn export_document(&mut self, doc_id: &str) -> Option<Vec<u8>> {
        let entry = self.documents.get_mut(doc_id)?;
        Some(self.engine.save(&mut entry.doc))
    }

    /// Restores a serialized document and stores it with [`Registry::set_document`].
    pub fn import_document(
        &mut self,
        doc_id: impl Into<DocId>,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        let doc = self.engine.load(bytes)?;
        self.set_document(doc_id, doc);
        Ok(())
    }

    fn emit(&self, doc_id: DocId, kind: ChangeKind) {
        // No subscribers is fine
        let _ = self.changes.send(DocumentChanged { doc_id, kind });
    }
}

/// Turns an engine error into a sync error, marking the document unusable
/// on invariant violations.
fn fail<D>(doc_id: &str, entry: &mut Entry<D>, err: EngineError) -> SyncError {
    if let EngineError::InvariantViolation(reason) = &err {
        tracing::warn!("Document {} is unusable: {}", doc_id, reason);
        entry.unusable = Some(reason.clone());
    } else {
        tracing::warn!("Rejected message for document {}: {}", doc_id, err);
    }
    SyncError::from_engine(doc_id, err)
}

impl<E: Engine> std::fmt::Debug for Registry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("documents", &self.documents.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
