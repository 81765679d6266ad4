//! The transport instance
//!
//! Owns every piece of mutable transport state (dedupe cache, batch queue,
//! client registry) so several independent instances can coexist, for example
//! one per test.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::broadcast::{BroadcastCoordinator, FsSnapshot, SnapshotProvider};
use crate::config::RelayConfig;
use crate::ingest::dedupe::DedupeFilter;
use crate::ingest::payload::PayloadBuilder;

pub struct Transport {
    config: RelayConfig,
    root: PathBuf,
    dedupe: DedupeFilter,
    payloads: PayloadBuilder,
    coordinator: Arc<BroadcastCoordinator>,
    snapshots: Arc<dyn SnapshotProvider>,
}

impl Transport {
    /// Build a transport whose snapshots are read from the watch root
    pub fn new(config: RelayConfig) -> Self {
        let root = canonical_root(&config.watch.root);
        let payloads = PayloadBuilder::new(config.sync.parse_retry_delay());
        let snapshots = Arc::new(FsSnapshot::new(root.clone(), payloads.clone()));
        Self::assemble(config, root, payloads, snapshots)
    }

    /// Build a transport with a custom snapshot source
    pub fn with_snapshots(config: RelayConfig, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        let root = canonical_root(&config.watch.root);
        let payloads = PayloadBuilder::new(config.sync.parse_retry_delay());
        Self::assemble(config, root, payloads, snapshots)
    }

    fn assemble(
        config: RelayConfig,
        root: PathBuf,
        payloads: PayloadBuilder,
        snapshots: Arc<dyn SnapshotProvider>,
    ) -> Self {
        Self {
            root,
            dedupe: DedupeFilter::new(config.sync.dedupe_window()),
            payloads,
            coordinator: Arc::new(BroadcastCoordinator::new(config.sync.flush_window())),
            snapshots,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Watch root, canonicalized when it exists
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dedupe(&self) -> &DedupeFilter {
        &self.dedupe
    }

    pub fn payloads(&self) -> &PayloadBuilder {
        &self.payloads
    }

    pub fn coordinator(&self) -> &Arc<BroadcastCoordinator> {
        &self.coordinator
    }

    pub fn snapshots(&self) -> &Arc<dyn SnapshotProvider> {
        &self.snapshots
    }
}

fn canonical_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}
