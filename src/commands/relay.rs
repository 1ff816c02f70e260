use clap::Args;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use automerge::transaction::Transactable;
use automerge::ROOT;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use docsync::{
    shared, AutomergeEngine, Batch, DocumentStorage, EncodedMessage, ProtocolMessage, Registry,
    Session, SharedRegistry,
};

use crate::config::Config;

/// How often replicas are compared while waiting for convergence.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Args)]
pub struct RelayCommand {
    /// Number of replicas in the chain
    #[arg(long, short, default_value_t = 3)]
    pub peers: usize,

    /// Document to edit on the first replica
    #[arg(long, short, default_value = "notes")]
    pub doc: String,

    /// Number of edits to make
    #[arg(long, short, default_value_t = 5)]
    pub edits: usize,

    /// Seconds to wait for every replica to catch up
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Load the first replica from the data directory and save it back
    #[arg(long)]
    pub persist: bool,
}

impl RelayCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if self.peers < 2 {
            return Err("relay needs at least two replicas".into());
        }

        let local = shared(Registry::new(AutomergeEngine::new()));
        let storage = DocumentStorage::new(config.data_dir.value.clone());
        if self.persist {
            let loaded = storage.load_registry(&mut *local.lock().await)?;
            println!("Loaded {} document(s) from {}", loaded, storage.data_dir().display());
        }

        let names = replica_names(&config.peer_id.value, self.peers);
        let mut replicas = vec![local];
        for _ in 1..self.peers {
            replicas.push(shared(Registry::new(AutomergeEngine::new())));
        }

        let _hops = chain(&replicas, &names).await;

        let started = Instant::now();
        edit(&replicas[0], &self.doc, &names[0], self.edits).await?;

        let Some(json) =
            wait_for_convergence(&replicas, &self.doc, Duration::from_secs(self.timeout)).await
        else {
            return Err(format!(
                "replicas did not converge within {}s",
                self.timeout
            )
            .into());
        };

        println!(
            "{} replicas converged on '{}' in {:?}",
            self.peers,
            self.doc,
            started.elapsed()
        );
        println!("{}", names.join(" <-> "));
        println!("{}", serde_json::to_string_pretty(&json)?);

        if self.persist {
            let saved = storage.save_registry(&mut *replicas[0].lock().await)?;
            println!("Saved {} document(s) to {}", saved, storage.data_dir().display());
        }

        Ok(())
    }
}

/// Names replicas after the local peer id: `id`, `id-1`, `id-2`, ...
fn replica_names(peer_id: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            if i == 0 {
                peer_id.to_string()
            } else {
                format!("{}-{}", peer_id, i)
            }
        })
        .collect()
}

/// One connection between neighbouring replicas. Dropping it stops the
/// frame pumps; the sessions close with it.
struct Hop {
    _left: Arc<Session<AutomergeEngine>>,
    _right: Arc<Session<AutomergeEngine>>,
    pumps: [JoinHandle<()>; 2],
}

impl Drop for Hop {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Connects each replica to the next one.
async fn chain(replicas: &[SharedRegistry<AutomergeEngine>], names: &[String]) -> Vec<Hop> {
    let mut hops = Vec::new();

    for i in 0..replicas.len().saturating_sub(1) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();

        let left =
            Arc::new(Session::open(replicas[i].clone(), names[i + 1].clone(), left_tx).await);
        let right =
            Arc::new(Session::open(replicas[i + 1].clone(), names[i].clone(), right_tx).await);

        let pumps = [
            frame_pump(left_rx, &names[i], &names[i + 1], &right),
            frame_pump(right_rx, &names[i + 1], &names[i], &left),
        ];
        hops.push(Hop {
            _left: left,
            _right: right,
            pumps,
        });
    }

    hops
}

/// Like the in-process transport pump, but every batch crosses the wire as
/// an encoded frame.
fn frame_pump(
    mut outbound: UnboundedReceiver<Batch<EncodedMessage>>,
    sender_id: &str,
    target_id: &str,
    remote: &Arc<Session<AutomergeEngine>>,
) -> JoinHandle<()> {
    let sender_id = sender_id.to_string();
    let target_id = target_id.to_string();
    let remote: Weak<Session<AutomergeEngine>> = Arc::downgrade(remote);

    tokio::spawn(async move {
        while let Some(documents) = outbound.recv().await {
            let Some(session) = remote.upgrade() else {
                break;
            };

            let frame = ProtocolMessage::Sync {
                sender_id: sender_id.clone(),
                target_id: target_id.clone(),
                documents,
            };
            let bytes = match frame.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Failed to encode frame: {}", e);
                    continue;
                }
            };

            match ProtocolMessage::decode(&bytes) {
                Ok(ProtocolMessage::Sync {
                    sender_id,
                    target_id,
                    documents,
                }) => {
                    // The remote session only speaks with the peer it was opened for
                    if sender_id != session.peer_id() {
                        tracing::warn!("Dropping frame from unexpected peer {}", sender_id);
                        continue;
                    }
                    tracing::debug!(
                        "{} -> {}: {} document(s), {} bytes",
                        sender_id,
                        target_id,
                        documents.len(),
                        bytes.len()
                    );
                    let report = session.data(documents).await;
                    for failure in report.failures() {
                        tracing::warn!("Sync with peer {}: {}", sender_id, failure);
                    }
                    if let Err(e) = report.response {
                        tracing::debug!("Pump stopped: {}", e);
                        break;
                    }
                }
                Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
            }
        }
    })
}

/// Makes `edits` changes to a document, creating it first if needed.
async fn edit(
    registry: &SharedRegistry<AutomergeEngine>,
    doc_id: &str,
    author: &str,
    edits: usize,
) -> Result<(), automerge::AutomergeError> {
    let mut registry = registry.lock().await;
    if !registry.contains(doc_id) {
        registry.create_document(doc_id);
    }

    for i in 0..edits {
        registry
            .update_document(doc_id, |doc| {
                doc.put(ROOT, "author", author)?;
                doc.put(ROOT, format!("edit-{}", i), i as i64)
            })
            .transpose()?;
    }

    tracing::info!("Made {} edit(s) to {}", edits, doc_id);
    Ok(())
}

/// Polls until every replica renders the document to the same JSON, then
/// returns it. Gives up after `timeout`.
async fn wait_for_convergence(
    replicas: &[SharedRegistry<AutomergeEngine>],
    doc_id: &str,
    timeout: Duration,
) -> Option<serde_json::Value> {
    let deadline = Instant::now() + timeout;

    loop {
        let mut rendered = Vec::with_capacity(replicas.len());
        for registry in replicas {
            let registry = registry.lock().await;
            rendered.push(
                registry
                    .get_document(doc_id)
                    .and_then(|doc| AutomergeEngine::to_json(doc).ok()),
            );
        }

        if let Some(Some(first)) = rendered.first() {
            if rendered.iter().all(|json| json.as_ref() == Some(first)) {
                return Some(first.clone());
            }
        }

        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registries(count: usize) -> Vec<SharedRegistry<AutomergeEngine>> {
        (0..count)
            .map(|_| shared(Registry::new(AutomergeEngine::new())))
            .collect()
    }

    #[test]
    fn test_replica_names() {
        assert_eq!(replica_names("me", 3), vec!["me", "me-1", "me-2"]);
    }

    #[tokio::test]
    async fn test_chain_relays_edits_to_the_far_end() {
        let replicas = registries(4);
        let names = replica_names("r", 4);
        let _hops = chain(&replicas, &names).await;

        edit(&replicas[0], "notes", "r", 3).await.unwrap();

        let json = wait_for_convergence(&replicas, "notes", Duration::from_secs(5))
            .await
            .expect("replicas converge");
        assert_eq!(
            json,
            serde_json::json!({ "author": "r", "edit-0": 0, "edit-1": 1, "edit-2": 2 })
        );
    }

    #[tokio::test]
    async fn test_unconnected_replicas_do_not_converge() {
        let replicas = registries(2);
        edit(&replicas[0], "notes", "r", 1).await.unwrap();

        let json =
            wait_for_convergence(&replicas, "notes", Duration::from_millis(100)).await;
        assert!(json.is_none());
    }

    #[tokio::test]
    async fn test_rejected_payload_keeps_pump_running() {
        let registry = shared(Registry::new(AutomergeEngine::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::open(registry.clone(), "left", tx).await);

        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let _pump = frame_pump(feed_rx, "left", "right", &session);

        let batch: Batch<_> = [("bad", EncodedMessage(vec![0xde, 0xad]))]
            .into_iter()
            .collect();
        feed_tx.send(batch).unwrap();

        // The frame decodes; the engine rejects the payload and the pump
        // keeps running
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.lock().await.contains("bad"));
        assert!(feed_tx.send(Batch::new()).is_ok());
    }

    #[tokio::test]
    async fn test_frames_from_other_peers_are_dropped() {
        let registry = shared(Registry::new(AutomergeEngine::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::open(registry.clone(), "left", tx).await);

        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let _pump = frame_pump(feed_rx, "stranger", "right", &session);

        let batch: Batch<_> = [("x", EncodedMessage(vec![0x42]))].into_iter().collect();
        feed_tx.send(batch).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!registry.lock().await.contains("x"));
    }

    #[tokio::test]
    async fn test_run_persists_first_replica() {
        let temp_dir = tempdir().unwrap();
        let data_dir = temp_dir.path().join("data");
        let data_dir_str = data_dir.to_string_lossy().to_string();
        let config = Config::load_with_env(Some(temp_dir.path().join("none.yaml")), |key| {
            match key {
                "DOCSYNC_DATA_DIR" => Some(data_dir_str.clone()),
                "DOCSYNC_PEER_ID" => Some("local".to_string()),
                _ => None,
            }
        })
        .unwrap();

        let cmd = RelayCommand {
            peers: 3,
            doc: "notes".to_string(),
            edits: 2,
            timeout: 5,
            persist: true,
        };
        cmd.run(&config).await.unwrap();

        let storage = DocumentStorage::new(data_dir);
        let mut registry = Registry::new(AutomergeEngine::new());
        assert_eq!(storage.load_registry(&mut registry).unwrap(), 1);
        let json = AutomergeEngine::to_json(registry.get_document("notes").unwrap()).unwrap();
        assert_eq!(json["author"], "local");
        assert_eq!(json["edit-1"], 1);
    }

    #[tokio::test]
    async fn test_run_rejects_single_replica() {
        let temp_dir = tempdir().unwrap();
        let config =
            Config::load_with_env(Some(temp_dir.path().join("none.yaml")), |_| None).unwrap();
        let cmd = RelayCommand {
            peers: 1,
            doc: "notes".to_string(),
            edits: 1,
            timeout: 1,
            persist: false,
        };
        assert!(cmd.run(&config).await.is_err());
    }
}
