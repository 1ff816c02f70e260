//! In-process transport between sessions.
//!
//! Each session emits batches on an unbounded channel. A pump drains that
//! channel into the remote session's [`Session::data`]. Pumps only hold weak
//! references to sessions, so dropping a session ends the pump that feeds it.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::batch::Batch;
use super::session::Session;
use crate::engine::Engine;

/// Delivers every batch from `outbound` to `remote`.
///
/// Stops when the channel closes or the remote session is dropped.
pub fn pump<E: Engine>(
    mut outbound: UnboundedReceiver<Batch<E::Message>>,
    remote: &Arc<Session<E>>,
) -> JoinHandle<()> {
    let remote: Weak<Session<E>> = Arc::downgrade(remote);

    tokio::spawn(async move {
        while let Some(batch) = outbound.recv().await {
            let Some(session) = remote.upgrade() else {
                break;
            };

            let report = session.data(batch).await;
            for failure in report.failures() {
                tracing::warn!("Sync with peer {}: {}", session.peer_id(), failure);
            }
            if let Err(err) = report.response {
                tracing::debug!("Pump stopped: {}", err);
                break;
            }
        }
    })
}

/// A bidirectional connection between two sessions.
pub struct Link {
    forward: JoinHandle<()>,
    backward: JoinHandle<()>,
}

impl Link {
    /// Stops both directions.
    pub fn close(&self) {
        self.forward.abort();
        self.backward.abort();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connects two sessions: batches `left` emits on `left_outbound` reach
/// `right`, and the other way around.
pub fn connect<E: Engine>(
    left: &Arc<Session<E>>,
    left_outbound: UnboundedReceiver<Batch<E::Message>>,
    right: &Arc<Session<E>>,
    right_outbound: UnboundedReceiver<Batch<E::Message>>,
) -> Link {
    Link {
        forward: pump(left_outbound, right),
        backward: pump(right_outbound, left),
    }
}
