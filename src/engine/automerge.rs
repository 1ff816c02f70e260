//! Engine binding for Automerge documents.

use automerge::sync::{Message as SyncMessage, State as SyncState, SyncDoc};
use automerge::{AutoCommit, AutoSerde, ChangeHash};
use serde::{Deserialize, Serialize};

use super::{Engine, EngineError};

/// An Automerge sync message in its binary encoding.
///
/// Messages stay encoded while they sit in batches so that a corrupt payload
/// only fails when the receiving registry tries to apply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedMessage(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl EncodedMessage {
    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EncodedMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// [`Engine`] over [`AutoCommit`] documents and the Automerge sync protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutomergeEngine;

impl AutomergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Renders a document as JSON.
    pub fn to_json(doc: &AutoCommit) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(AutoSerde::from(doc))
    }
}

impl Engine for AutomergeEngine {
    type Document = AutoCommit;
    type SyncState = SyncState;
    type Message = EncodedMessage;
    type Version = Vec<ChangeHash>;

    fn init(&self) -> AutoCommit {
        AutoCommit::new()
    }

    fn init_sync_state(&self) -> SyncState {
        SyncState::new()
    }

    fn generate(
        &self,
        doc: &mut AutoCommit,
        state: &mut SyncState,
    ) -> Result<Option<EncodedMessage>, EngineError> {
        Ok(doc
            .sync()
            .generate_sync_message(state)
            .map(|msg| EncodedMessage(msg.encode())))
    }

    fn receive(
        &self,
        doc: &mut AutoCommit,
        state: &mut SyncState,
        message: EncodedMessage,
    ) -> Result<(), EngineError> {
        let msg = SyncMessage::decode(message.as_bytes())
            .map_err(|e| EngineError::MalformedMessage(e.to_string()))?;

        doc.sync()
            .receive_sync_message(state, msg)
            .map_err(|e| EngineError::MalformedMessage(e.to_string()))
    }

    fn version(&self, doc: &mut AutoCommit) -> Vec<ChangeHash> {
        doc.get_heads().to_vec()
    }

    fn save(&self, doc: &mut AutoCommit) -> Vec<u8> {
        doc.save()
    }

    fn load(&self, bytes: &[u8]) -> Result<AutoCommit, EngineError> {
        AutoCommit::load(bytes).map_err(|e| EngineError::InvariantViolation(e.to_string()))
    }
}
