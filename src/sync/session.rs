//! Sync sessions with a single remote peer.

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use super::batch::Batch;
use super::error::SyncError;
use super::registry::{ApplyReport, DocumentChanged, Registry};
use super::PeerId;
use crate::engine::Engine;

/// A registry shared by every session of one replica.
///
/// The mutex is the single boundary around generate and apply, which both
/// touch the same per-peer sync states.
pub type SharedRegistry<E> = Arc<Mutex<Registry<E>>>;

/// Wraps a registry for use by sessions.
pub fn shared<E: Engine>(registry: Registry<E>) -> SharedRegistry<E> {
    Arc::new(Mutex::new(registry))
}

/// Result of one notify attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Number of documents in the batch handed to the transport.
    pub sent: usize,
    /// Documents the engine could not generate for.
    pub failures: Vec<SyncError>,
}

/// Result of handling one inbound batch.
///
/// The batch is applied before the response is attempted, so `applied`
/// is always filled in, even when the response could not be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReport {
    pub applied: ApplyReport,
    /// The response sent right after applying.
    pub response: Result<NotifyReport, SyncError>,
}

impl DataReport {
    /// Every per-document failure from applying and answering.
    pub fn failures(&self) -> impl Iterator<Item = &SyncError> {
        let response = match &self.response {
            Ok(report) => report.failures.as_slice(),
            Err(_) => &[][..],
        };
        self.applied.failures.iter().chain(response)
    }
}

/// Exchanges batches between a registry and one remote peer.
///
/// A background task watches the registry for changes and pushes a batch
/// whenever the peer is behind. It waits one scheduling tick after a change
/// and folds every change that arrived meanwhile into a single notify, so a
/// burst of edits produces one batch.
///
/// Dropping the session stops the task.
pub struct Session<E: Engine> {
    registry: SharedRegistry<E>,
    peer_id: PeerId,
    outbound: mpsc::UnboundedSender<Batch<E::Message>>,
    driver: JoinHandle<()>,
}

impl<E: Engine> Session<E> {
    /// Opens a session with `peer_id`. Batches for the peer are sent on
    /// `outbound`.
    ///
    /// The first notify is scheduled right away, so a registry that already
    /// holds documents pushes them without waiting for an edit.
    pub async fn open(
        registry: SharedRegistry<E>,
        peer_id: impl Into<PeerId>,
        outbound: mpsc::UnboundedSender<Batch<E::Message>>,
    ) -> Self {
        let peer_id = peer_id.into();
        let changes = registry.lock().await.subscribe();
        let driver = tokio::spawn(drive(
            registry.clone(),
            peer_id.clone(),
            outbound.clone(),
            changes,
        ));

        tracing::debug!("Opened session with peer {}", peer_id);
        Self {
            registry,
            peer_id,
            outbound,
            driver,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn registry(&self) -> &SharedRegistry<E> {
        &self.registry
    }

    /// Sends the peer whatever it is missing. Does nothing when it is
    /// caught up.
    pub async fn notify(&self) -> Result<NotifyReport, SyncError> {
        notify_peer(&self.registry, &self.peer_id, &self.outbound).await
    }

    /// Handles a batch received from the peer, then answers it.
    pub async fn data(&self, batch: Batch<E::Message>) -> DataReport {
        let applied = self
            .registry
            .lock()
            .await
            .apply_incoming_messages(&self.peer_id, batch);
        let response = self.notify().await;
        DataReport { applied, response }
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        self.driver.abort();
        tracing::debug!("Closed session with peer {}", self.peer_id);
    }
}

async fn notify_peer<E: Engine>(
    registry: &SharedRegistry<E>,
    peer_id: &str,
    outbound: &mpsc::UnboundedSender<Batch<E::Message>>,
) -> Result<NotifyReport, SyncError> {
    let outgoing = registry.lock().await.generate_outgoing_messages(peer_id);
    let sent = outgoing.batch.len();

    if sent > 0 {
        outbound
            .send(outgoing.batch)
            .map_err(|_| SyncError::SessionClosed(peer_id.to_string()))?;
    }

    Ok(NotifyReport {
        sent,
        failures: outgoing.failures,
    })
}

async fn drive<E: Engine>(
    registry: SharedRegistry<E>,
    peer_id: PeerId,
    outbound: mpsc::UnboundedSender<Batch<E::Message>>,
    mut changes: broadcast::Receiver<DocumentChanged>,
) {
    loop {
        tokio::task::yield_now().await;
        if !drain(&mut changes) {
            return;
        }

        match notify_peer(&registry, &peer_id, &outbound).await {
            Ok(report) => {
                for failure in &report.failures {
                    tracing::warn!("Sync with peer {}: {}", peer_id, failure);
                }
            }
            Err(err) => {
                tracing::debug!("Stopping notifications: {}", err);
                return;
            }
        }

        match changes.recv().await {
            // Missed notifications still mean something changed
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return,
        }
    }
}

/// Discards queued change notifications. Returns false once the registry
/// is gone.
fn drain(changes: &mut broadcast::Receiver<DocumentChanged>) -> bool {
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Closed) => return false,
        }
    }
}
