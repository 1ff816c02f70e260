//! Grow-only set engine for exercising the sync core in tests.

use std::collections::BTreeSet;

use super::{Engine, EngineError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockDoc {
    pub items: BTreeSet<u32>,
    pub corrupt: bool,
}

impl MockDoc {
    pub fn with_items(items: impl IntoIterator<Item = u32>) -> Self {
        Self {
            items: items.into_iter().collect(),
            corrupt: false,
        }
    }
}

/// Items we believe the peer already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockState {
    pub known: BTreeSet<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockMessage {
    Items(BTreeSet<u32>),
    /// Fails to decode.
    Garbage,
    /// Trips the engine's invariant check.
    Poison,
}

impl MockMessage {
    pub fn items(items: impl IntoIterator<Item = u32>) -> Self {
        MockMessage::Items(items.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockEngine;

impl Engine for MockEngine {
    type Document = MockDoc;
    type SyncState = MockState;
    type Message = MockMessage;
    type Version = BTreeSet<u32>;

    fn init(&self) -> MockDoc {
        MockDoc::default()
    }

    fn init_sync_state(&self) -> MockState {
        MockState::default()
    }

    fn generate(
        &self,
        doc: &mut MockDoc,
        state: &mut MockState,
    ) -> Result<Option<MockMessage>, EngineError> {
        if doc.corrupt {
            return Err(EngineError::InvariantViolation("corrupt document".into()));
        }
        let missing: BTreeSet<u32> = doc.items.difference(&state.known).copied().collect();
        if missing.is_empty() {
            return Ok(None);
        }
        state.known.extend(missing.iter().copied());
        Ok(Some(MockMessage::Items(missing)))
    }

    fn receive(
        &self,
        doc: &mut MockDoc,
        state: &mut MockState,
        message: MockMessage,
    ) -> Result<(), EngineError> {
        if doc.corrupt {
            return Err(EngineError::InvariantViolation("corrupt document".into()));
        }
        match message {
            MockMessage::Items(items) => {
                doc.items.extend(items.iter().copied());
                state.known.extend(items);
                Ok(())
            }
            MockMessage::Garbage => Err(EngineError::MalformedMessage("garbage".into())),
            MockMessage::Poison => Err(EngineError::InvariantViolation("poisoned".into())),
        }
    }

    fn version(&self, doc: &mut MockDoc) -> BTreeSet<u32> {
        doc.items.clone()
    }

    fn save(&self, doc: &mut MockDoc) -> Vec<u8> {
        serde_json::to_vec(&doc.items).unwrap_or_default()
    }

    fn load(&self, bytes: &[u8]) -> Result<MockDoc, EngineError> {
        let items: BTreeSet<u32> = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::InvariantViolation(e.to_string()))?;
        Ok(MockDoc {
            items,
            corrupt: false,
        })
    }
}
