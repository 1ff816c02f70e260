//! Mergeable document engines.
//!
//! The sync core never looks inside documents, sync states or messages. It
//! only calls the primitives of an [`Engine`]: create a document, create a
//! sync state, generate a message for a peer, and receive a message from a
//! peer. [`AutomergeEngine`] binds those primitives to the `automerge` crate.

mod automerge;
#[cfg(test)]
pub(crate) mod mock;

pub use self::automerge::{AutomergeEngine, EncodedMessage};

use thiserror::Error;

/// Failures reported by an engine primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The message could not be decoded or applied. The document is intact.
    #[error("malformed sync message: {0}")]
    MalformedMessage(String),

    /// The document is in a state the engine refuses to operate on.
    #[error("document invariant violated: {0}")]
    InvariantViolation(String),
}

/// Capability interface over a mergeable document engine.
///
/// `generate` and `receive` work in place; callers that need to keep the
/// previous values on failure operate on clones.
pub trait Engine: Send + Sync + 'static {
    /// The mergeable document value.
    type Document: Clone + Send + 'static;
    /// Per (document, peer) protocol bookkeeping.
    type SyncState: Clone + Send + 'static;
    /// One delta for one document.
    type Message: Clone + Send + 'static;
    /// Cheap summary of a document's content, used to detect changes.
    type Version: PartialEq + Send;

    /// Creates a document with default content.
    fn init(&self) -> Self::Document;

    /// Creates an empty sync state for a peer that has seen nothing.
    fn init_sync_state(&self) -> Self::SyncState;

    /// Produces the next message for the peer tracked by `state`, if any.
    ///
    /// `state` is advanced even when no message is produced.
    fn generate(
        &self,
        doc: &mut Self::Document,
        state: &mut Self::SyncState,
    ) -> Result<Option<Self::Message>, EngineError>;

    /// Applies a message from the peer tracked by `state` to `doc`.
    fn receive(
        &self,
        doc: &mut Self::Document,
        state: &mut Self::SyncState,
        message: Self::Message,
    ) -> Result<(), EngineError>;

    /// Returns the document's current version.
    fn version(&self, doc: &mut Self::Document) -> Self::Version;

    /// Serializes a document for persistence.
    fn save(&self, doc: &mut Self::Document) -> Vec<u8>;

    /// Restores a document serialized by [`Engine::save`].
    fn load(&self, bytes: &[u8]) -> Result<Self::Document, EngineError>;
}
