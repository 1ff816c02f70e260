//! docsync
//!
//! Keeps many mergeable documents in sync across many peers.

pub mod engine;
pub mod storage;
pub mod sync;

pub use engine::{AutomergeEngine, EncodedMessage, Engine, EngineError};
pub use storage::{DocumentStorage, StorageError};
pub use sync::{
    generate_peer_id, shared, ApplyReport, Batch, ChangeKind, DataReport, DocId, DocumentChanged,
    NotifyReport, Outgoing, PeerId, ProtocolMessage, Registry, Session, SharedRegistry, SyncError,
    SyncStateStore,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
