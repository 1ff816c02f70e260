//! Wire frames for transports that carry bytes.
//!
//! Frames are CBOR-encoded. Field names use camelCase and message payloads
//! are CBOR byte strings.

use serde::{Deserialize, Serialize};

use super::batch::Batch;
use crate::engine::EncodedMessage;

/// Frames exchanged between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolMessage {
    /// A batch of sync messages
    #[serde(rename = "sync")]
    Sync {
        #[serde(rename = "senderId")]
        sender_id: String,
        #[serde(rename = "targetId")]
        target_id: String,
        documents: Batch<EncodedMessage>,
    },
}

impl ProtocolMessage {
    /// Encode message as CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    /// Decode message from CBOR bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
        ciborium::from_reader(data)
    }
}

/// Generate a random peer ID.
pub fn generate_peer_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id() {
        let id1 = generate_peer_id();
        let id2 = generate_peer_id();
        assert_ne!(id1, id2);
        assert!(uuid::Uuid::parse_str(&id1).is_ok());
    }

    #[test]
    fn test_sync_message_encode_decode() {
        let mut documents = Batch::new();
        documents.insert("notes", EncodedMessage(vec![0x42, 1, 2, 3]));
        documents.insert("todo", EncodedMessage(vec![]));

        let msg = ProtocolMessage::Sync {
            sender_id: "peer1".to_string(),
            target_id: "peer2".to_string(),
            documents: documents.clone(),
        };

        let encoded = msg.encode().unwrap();
        let decoded = ProtocolMessage::decode(&encoded).unwrap();

        let ProtocolMessage::Sync {
            sender_id,
            target_id,
            documents: decoded_documents,
        } = decoded;
        assert_eq!(sender_id, "peer1");
        assert_eq!(target_id, "peer2");
        assert_eq!(decoded_documents, documents);
    }

    #[test]
    fn test_sync_frame_is_tagged() {
        let msg = ProtocolMessage::Sync {
            sender_id: "a".to_string(),
            target_id: "b".to_string(),
            documents: Batch::new(),
        };

        let value: ciborium::Value = ciborium::from_reader(&msg.encode().unwrap()[..]).unwrap();
        let map = value.as_map().unwrap();
        let field = |name: &str| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v.clone())
        };
        assert_eq!(field("type"), Some(ciborium::Value::Text("sync".into())));
        assert_eq!(field("senderId"), Some(ciborium::Value::Text("a".into())));
        assert!(field("sender_id").is_none());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ProtocolMessage::decode(&[0xff, 0xfe, 0x00]).is_err());
    }
}
