//! Notification-to-broadcast pipeline
//!
//! ```text
//! WatchNotification ─► match_path ─► (per-path lock) ─► dedupe ─► payload ─► enqueue
//! ```
//!
//! Each accepted notification runs as its own task. Work for one path is
//! chained: `dispatch` takes the path's place in line synchronously, and each
//! task waits for the one dispatched before it on the same path, so changes to
//! a file are enqueued in the order they were detected. Distinct paths proceed
//! concurrently, bounded by a semaphore.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use super::matcher::{match_path, normalize, SemanticEvent};
use super::watcher::{SourceItem, WatchNotification};
use crate::error::RelayError;
use crate::transport::Transport;

/// Completion signal of the latest task queued for a path
struct PathTail {
    turn: u64,
    done: oneshot::Receiver<()>,
}

/// A task's place in its path's chain
struct Turn {
    turn: u64,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

pub struct IngestPipeline {
    transport: Arc<Transport>,
    root: PathBuf,
    permits: Semaphore,
    next_turn: AtomicU64,
    tails: Mutex<HashMap<String, PathTail>>,
}

impl IngestPipeline {
    /// `root` must be the same root the change source reports paths under
    pub fn new(transport: Arc<Transport>, root: PathBuf) -> Arc<Self> {
        let max_in_flight = transport.config().sync.max_in_flight.max(1);
        Arc::new(Self {
            transport,
            root,
            permits: Semaphore::new(max_in_flight),
            next_turn: AtomicU64::new(0),
            tails: Mutex::new(HashMap::new()),
        })
    }

    /// Consume the change source until it closes
    ///
    /// Watcher errors are handed to `on_error`; the pipeline keeps running and
    /// does not restart the watcher.
    pub async fn run<F>(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<SourceItem>, on_error: F)
    where
        F: Fn(RelayError),
    {
        while let Some(item) = rx.recv().await {
            match item {
                Ok(notification) => {
                    let _ = self.dispatch(notification);
                }
                Err(e) => on_error(e),
            }
        }
        tracing::info!("Change source closed, ingestion stopped");
    }

    /// Spawn processing for one notification
    ///
    /// Returns `None` for paths outside the root or without a matching rule.
    /// The task resolves to the enqueued sequence, or `None` if suppressed.
    pub fn dispatch(
        self: &Arc<Self>,
        notification: WatchNotification,
    ) -> Option<JoinHandle<Option<u64>>> {
        let rel = match notification.absolute_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                tracing::debug!(path = %notification.absolute_path.display(), "Outside watch root");
                return None;
            }
        };
        let Some(event) = match_path(&rel) else {
            tracing::debug!(path = %rel.display(), "No matching rule");
            return None;
        };

        let key = normalize(&rel);
        let turn = self.take_turn(&key);
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            this.process(notification, rel, key, event, turn).await
        }))
    }

    /// Queue behind the latest task for `key`; must run before spawning
    fn take_turn(&self, key: &str) -> Turn {
        let turn = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let (done, done_rx) = oneshot::channel();
        let previous = self
            .tails
            .lock()
            .insert(key.to_string(), PathTail { turn, done: done_rx })
            .map(|tail| tail.done);
        Turn {
            turn,
            previous,
            done,
        }
    }

    async fn process(
        &self,
        notification: WatchNotification,
        rel: PathBuf,
        key: String,
        event: SemanticEvent,
        turn: Turn,
    ) -> Option<u64> {
        if let Some(previous) = turn.previous {
            // Err only means the earlier task is gone; either way it is done
            let _ = previous.await;
        }
        let sequence = self.accept(&notification, &rel, &key, event).await;

        {
            let mut tails = self.tails.lock();
            if tails.get(&key).is_some_and(|tail| tail.turn == turn.turn) {
                tails.remove(&key);
            }
        }
        let _ = turn.done.send(());
        sequence
    }

    async fn accept(
        &self,
        notification: &WatchNotification,
        rel: &Path,
        key: &str,
        event: SemanticEvent,
    ) -> Option<u64> {
        let _permit = self.permits.acquire().await.ok()?;
        let kind = notification.kind;
        let abs = &notification.absolute_path;

        if self.transport.dedupe().should_skip(abs, key, kind).await {
            tracing::debug!(path = key, %kind, "Duplicate notification suppressed");
            return None;
        }

        let payload = self
            .transport
            .payloads()
            .build(abs, rel, kind, event.domain_kind)
            .await;
        let sequence = self
            .transport
            .coordinator()
            .enqueue(event.domain_type, payload);
        tracing::info!(path = key, %kind, domain_type = %event.domain_type, sequence, "Change enqueued");
        Some(sequence)
    }

    /// Number of paths with work queued or running
    pub fn active_paths(&self) -> usize {
        self.tails.lock().len()
    }
}
