//! Multi-document, multi-peer synchronization.
//!
//! ## Components
//!
//! - [`SyncStateStore`]: protocol state per (document, peer) pair
//! - [`Registry`]: documents plus their sync states; generates outgoing
//!   batches and applies incoming ones
//! - [`Session`]: binds a registry to one remote peer and drives the
//!   exchange over a transport
//!
//! ## Flow
//!
//! ```text
//! local edit ──> Registry ──change──> Session ──batch──> transport
//!                   ^                                        │
//!                   └──apply── Session <──batch── remote ────┘
//! ```
//!
//! After applying a batch a session immediately tries to answer, and every
//! document the batch changed wakes the registry's other sessions, so
//! updates relay through intermediate peers.

mod batch;
mod error;
mod protocol;
mod registry;
mod session;
mod state;
pub mod transport;

pub use batch::Batch;
pub use error::SyncError;
pub use protocol::{generate_peer_id, ProtocolMessage};
pub use registry::{ApplyReport, ChangeKind, DocumentChanged, Outgoing, Registry};
pub use session::{shared, DataReport, NotifyReport, Session, SharedRegistry};
pub use state::SyncStateStore;

/// Identifies a document within a registry.
pub type DocId = String;

/// Identifies a remote peer.
pub type PeerId = String;
