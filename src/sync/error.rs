//! Sync error types.

use thiserror::Error;

use super::{DocId, PeerId};
use crate::engine::EngineError;

/// Errors reported by the registry and sessions.
///
/// Document-scoped errors are collected per entry so the rest of a batch
/// still goes through.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A message could not be applied. The document and its sync state keep
    /// their previous values.
    #[error("malformed sync message for document '{doc_id}': {reason}")]
    MalformedMessage { doc_id: DocId, reason: String },

    /// The engine refused to operate on the document. It stays unusable
    /// until it is replaced.
    #[error("document '{doc_id}' is unusable: {reason}")]
    DocumentUnusable { doc_id: DocId, reason: String },

    /// The transport side of the session has gone away.
    #[error("session with peer '{0}' is closed")]
    SessionClosed(PeerId),
}

impl SyncError {
    pub(crate) fn from_engine(doc_id: &str, err: EngineError) -> Self {
        match err {
            EngineError::MalformedMessage(reason) => SyncError::MalformedMessage {
                doc_id: doc_id.to_string(),
                reason,
            },
            EngineError::InvariantViolation(reason) => SyncError::DocumentUnusable {
                doc_id: doc_id.to_string(),
                reason,
            },
        }
    }

    /// Returns the document the error is scoped to, if any.
    pub fn doc_id(&self) -> Option<&str> {
        match self {
            SyncError::MalformedMessage { doc_id, .. }
            | SyncError::DocumentUnusable { doc_id, .. } => Some(doc_id),
            SyncError::SessionClosed(_) => None,
        }
    }

    /// Returns true if retrying with a later message may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::MalformedMessage { .. })
    }
}
