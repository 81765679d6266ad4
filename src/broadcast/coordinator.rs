//! Batched fan-out to connected clients
//!
//! Sequence numbers are assigned synchronously in [`BroadcastCoordinator::enqueue`],
//! so enqueue order is the one total order clients observe. Payloads are built
//! asynchronously before enqueue, which means two distinct paths may be
//! broadcast in a different order than they were detected.
//!
//! # Locking Order
//!
//! 1. `clients`
//! 2. `batch`
//!
//! `flush` never holds both; `register_deferring` takes them in this order.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::gate::{ClientSyncState, Route};
use super::protocol::{initial_state_frame, snapshot_error_frame, DomainType, OutboundMessage};

/// Connection identity used to key per-client state
pub type ClientId = String;

/// What a connection task is asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    /// Serialization failed; the connection must terminate
    Close,
}

struct ClientEntry {
    tx: mpsc::UnboundedSender<ClientFrame>,
    sync: ClientSyncState,
}

impl ClientEntry {
    /// Returns false once the connection task is gone
    fn send(&self, frame: ClientFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

#[derive(Default)]
struct BatchState {
    pending: Vec<OutboundMessage>,
    flush_armed: bool,
    last_sequence: u64,
}

fn new_client_id() -> ClientId {
    format!("cli_{}", uuid::Uuid::new_v4().simple())
}

/// Per-server batching queue and client registry
pub struct BroadcastCoordinator {
    flush_window: Duration,
    batch: Mutex<BatchState>,
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
}

impl BroadcastCoordinator {
    pub fn new(flush_window: Duration) -> Self {
        Self {
            flush_window,
            batch: Mutex::new(BatchState::default()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a message for the next flush and return its sequence
    ///
    /// Arms the flush timer if none is armed. Must be called inside a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, domain_type: DomainType, payload: Value) -> u64 {
        let (sequence, arm) = {
            let mut batch = self.batch.lock();
            batch.last_sequence += 1;
            let sequence = batch.last_sequence;
            batch.pending.push(OutboundMessage {
                domain_type,
                payload,
                sequence,
            });
            let arm = !batch.flush_armed;
            batch.flush_armed = true;
            (sequence, arm)
        };

        tracing::debug!(%domain_type, sequence, "Enqueued message");

        if arm {
            let weak: Weak<Self> = Arc::downgrade(self);
            let window = self.flush_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.flush();
                }
            });
        }
        sequence
    }

    /// Drain the pending queue to every currently connected client
    ///
    /// Returns the number of frames handed to connections.
    pub fn flush(&self) -> usize {
        let batch = {
            let mut state = self.batch.lock();
            state.flush_armed = false;
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return 0;
        }

        let mut clients = self.clients.lock();
        if clients.is_empty() {
            tracing::debug!(messages = batch.len(), "No clients, dropping batch");
            return 0;
        }

        let frames: Vec<Option<String>> = batch
            .iter()
            .map(|msg| match msg.to_frame() {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(sequence = msg.sequence, error = %e, "Failed to serialize frame");
                    None
                }
            })
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (client_id, entry) in clients.iter_mut() {
            for (msg, frame) in batch.iter().zip(&frames) {
                if entry.sync.route(msg) != Route::Deliver {
                    continue;
                }
                let alive = match frame {
                    Some(text) => entry.send(ClientFrame::Text(text.clone())),
                    None => {
                        let _ = entry.send(ClientFrame::Close);
                        false
                    }
                };
                if !alive {
                    dead.push(client_id.clone());
                    break;
                }
                delivered += 1;
            }
        }

        for client_id in dead {
            tracing::debug!(%client_id, "Evicting unreachable client");
            clients.remove(&client_id);
        }

        tracing::debug!(
            messages = batch.len(),
            clients = clients.len(),
            delivered,
            "Flushed batch"
        );
        delivered
    }

    /// Register a connection with an open gate
    ///
    /// Only for consumers that never take a snapshot; application connections
    /// use [`Self::register_deferring`].
    pub fn register(&self, tx: mpsc::UnboundedSender<ClientFrame>) -> ClientId {
        let client_id = new_client_id();
        self.clients.lock().insert(
            client_id.clone(),
            ClientEntry {
                tx,
                sync: ClientSyncState::new(),
            },
        );
        client_id
    }

    /// Register a connection whose gate is already closed
    ///
    /// The anchor is captured under the registry lock, so no flush can reach
    /// the client between registration and the start of its initial sync.
    pub fn register_deferring(&self, tx: mpsc::UnboundedSender<ClientFrame>) -> (ClientId, u64) {
        let client_id = new_client_id();
        let mut clients = self.clients.lock();
        let anchor = self.batch.lock().last_sequence;
        clients.insert(
            client_id.clone(),
            ClientEntry {
                tx,
                sync: ClientSyncState::deferring(anchor),
            },
        );
        (client_id, anchor)
    }

    /// Send the snapshot (or its error notice), then release deferred messages
    ///
    /// After a failed snapshot every held message is released, including those
    /// at or below the anchor, since nothing else carries them to this client.
    ///
    /// Returns false if the client is already gone, in which case nothing is sent.
    pub fn complete_initial_sync(
        &self,
        client_id: &str,
        snapshot: std::result::Result<Value, String>,
    ) -> bool {
        let mut clients = self.clients.lock();
        let Some(entry) = clients.get_mut(client_id) else {
            return false;
        };
        let anchor = entry
            .sync
            .anchor()
            .unwrap_or_else(|| self.batch.lock().last_sequence);

        let first = match &snapshot {
            Ok(state) => initial_state_frame(state, anchor),
            Err(message) => {
                tracing::warn!(%client_id, error = %message, "Initial snapshot failed");
                snapshot_error_frame(message, anchor)
            }
        };

        let mut alive = match first {
            Ok(text) => entry.send(ClientFrame::Text(text)),
            Err(e) => {
                tracing::warn!(%client_id, error = %e, "Failed to serialize initial state");
                let _ = entry.send(ClientFrame::Close);
                false
            }
        };

        let released = entry.sync.open(snapshot.is_ok());
        let released_count = released.len();
        for msg in released {
            if !alive {
                break;
            }
            alive = match msg.to_frame() {
                Ok(text) => entry.send(ClientFrame::Text(text)),
                Err(e) => {
                    tracing::warn!(%client_id, error = %e, "Failed to serialize frame");
                    let _ = entry.send(ClientFrame::Close);
                    false
                }
            };
        }

        if !alive {
            clients.remove(client_id);
            return false;
        }
        tracing::debug!(%client_id, anchor, released = released_count, "Client synced");
        true
    }

    /// Drop a connection's state; nothing is delivered to it afterwards
    pub fn unregister(&self, client_id: &str) -> bool {
        self.clients.lock().remove(client_id).is_some()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_deferring(&self, client_id: &str) -> Option<bool> {
        self.clients
            .lock()
            .get(client_id)
            .map(|e| e.sync.is_deferring())
    }

    /// Last sequence handed out (0 before the first enqueue)
    pub fn last_sequence(&self) -> u64 {
        self.batch.lock().last_sequence
    }

    pub fn pending_len(&self) -> usize {
        self.batch.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinator() -> Arc<BroadcastCoordinator> {
        Arc::new(BroadcastCoordinator::new(Duration::from_millis(50)))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientFrame>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            match frame {
                ClientFrame::Text(text) => out.push(serde_json::from_str(&text).unwrap()),
                ClientFrame::Close => panic!("unexpected close"),
            }
        }
        out
    }

    #[tokio::test]
    async fn test_sequences_are_gapless_and_increasing() {
        let c = coordinator();
        let seqs: Vec<u64> = (0..10)
            .map(|i| c.enqueue(DomainType::TaskUpdate, json!({ "i": i })))
            .collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
        assert_eq!(c.last_sequence(), 10);
        assert_eq!(c.pending_len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_batch_to_open_client() {
        let c = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        c.register(tx);

        c.enqueue(DomainType::TaskUpdate, json!({ "n": 1 }));
        c.enqueue(DomainType::ReportUpdate, json!({ "n": 2 }));
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "task_update");
        assert_eq!(frames[1]["sequence"], 2);
        assert_eq!(c.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_flush_resolves_clients_at_flush_time() {
        let c = coordinator();
        c.enqueue(DomainType::TaskUpdate, json!({}));

        let (tx, mut rx) = mpsc::unbounded_channel();
        c.register(tx);
        assert_eq!(c.flush(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_clients_drops_batch() {
        let c = coordinator();
        c.enqueue(DomainType::TaskUpdate, json!({}));
        assert_eq!(c.flush(), 0);
        assert_eq!(c.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_deferred_messages_follow_initial_state() {
        let c = coordinator();
        c.enqueue(DomainType::TaskUpdate, json!({ "before": true }));
        c.flush();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, anchor) = c.register_deferring(tx);
        assert_eq!(anchor, 1);
        assert_eq!(c.is_deferring(&id), Some(true));

        c.enqueue(DomainType::GameStateUpdate, json!({ "m": 1 }));
        c.enqueue(DomainType::GameStateUpdate, json!({ "m": 2 }));
        c.flush();
        assert!(drain(&mut rx).is_empty());

        assert!(c.complete_initial_sync(&id, Ok(json!({ "tasks": [] }))));
        let frames = drain(&mut rx);
        let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(types, ["initial_state", "game_state_update", "game_state_update"]);
        let seqs: Vec<u64> = frames.iter().map(|f| f["sequence"].as_u64().unwrap()).collect();
        assert_eq!(seqs, [1, 2, 3]);
        assert_eq!(c.is_deferring(&id), Some(false));
    }

    #[tokio::test]
    async fn test_pending_before_anchor_is_not_redelivered() {
        let c = coordinator();
        c.enqueue(DomainType::TaskUpdate, json!({}));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = c.register_deferring(tx);
        c.flush();
        c.complete_initial_sync(&id, Ok(json!({})));

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "initial_state");
    }

    #[tokio::test]
    async fn test_failed_snapshot_still_opens_gate() {
        let c = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = c.register_deferring(tx);
        c.enqueue(DomainType::CommandUpdate, json!({ "commands": [] }));
        c.flush();

        assert!(c.complete_initial_sync(&id, Err("root unreadable".into())));
        let frames = drain(&mut rx);
        assert_eq!(frames[0]["type"], "ws_error");
        assert_eq!(frames[0]["payload"]["recoverable"], true);
        assert_eq!(frames[1]["type"], "command_update");
    }

    #[tokio::test]
    async fn test_failed_snapshot_releases_batch_pending_at_connect() {
        let c = coordinator();
        c.enqueue(DomainType::TaskUpdate, json!({ "workerId": "ashigaru1" }));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, anchor) = c.register_deferring(tx);
        assert_eq!(anchor, 1);
        c.flush();
        c.complete_initial_sync(&id, Err("boom".into()));

        let frames = drain(&mut rx);
        let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(types, ["ws_error", "task_update"]);
        assert_eq!(frames[1]["sequence"], 1);
    }

    #[tokio::test]
    async fn test_unregistered_client_receives_nothing() {
        let c = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (id, _) = c.register_deferring(tx);
        c.enqueue(DomainType::TaskUpdate, json!({}));
        c.flush();

        assert!(c.unregister(&id));
        assert!(!c.complete_initial_sync(&id, Ok(json!({}))));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(c.client_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_initial_state_first_under_concurrent_flushes() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let c = coordinator();
        let stop = Arc::new(AtomicBool::new(false));
        let flusher = {
            let c = Arc::clone(&c);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    c.flush();
                }
            })
        };

        let mut violations = 0;
        for i in 0..5_000 {
            c.enqueue(DomainType::TaskUpdate, json!({ "i": i }));
            let (tx, mut rx) = mpsc::unbounded_channel();
            let (id, _) = c.register_deferring(tx);
            c.enqueue(DomainType::TaskUpdate, json!({ "i": i, "after": true }));
            c.complete_initial_sync(&id, Ok(json!({})));

            let first = drain(&mut rx).into_iter().next();
            if first.as_ref().map(|f| f["type"].clone()) != Some(json!("initial_state")) {
                violations += 1;
            }
            c.unregister(&id);
        }

        stop.store(true, Ordering::Relaxed);
        flusher.join().unwrap();
        assert_eq!(violations, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_evicted_on_flush() {
        let c = coordinator();
        let (tx, rx) = mpsc::unbounded_channel();
        c.register(tx);
        drop(rx);

        c.enqueue(DomainType::TaskUpdate, json!({}));
        c.flush();
        assert_eq!(c.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_timer_per_batch() {
        let c = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        c.register(tx);

        c.enqueue(DomainType::TaskUpdate, json!({}));
        tokio::time::sleep(Duration::from_millis(30)).await;
        c.enqueue(DomainType::TaskUpdate, json!({}));
        tokio::time::sleep(Duration::from_millis(25)).await;
        // First timer fired at 50ms and carried both messages
        assert_eq!(drain(&mut rx).len(), 2);

        c.enqueue(DomainType::TaskUpdate, json!({}));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
