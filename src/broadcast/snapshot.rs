//! Initial state for freshly connected clients

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::ingest::matcher::{match_path, DomainKind};
use crate::ingest::payload::PayloadBuilder;
use crate::ingest::watcher::EventKind;

/// Source of the full current application state
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn fetch(&self) -> Result<Value>;
}

/// Builds the snapshot from the files under the watch root
///
/// Each entry has the same shape as the matching update payload, so the
/// client can apply the snapshot with the same reducers.
pub struct FsSnapshot {
    root: PathBuf,
    payloads: PayloadBuilder,
}

impl FsSnapshot {
    pub fn new(root: PathBuf, payloads: PayloadBuilder) -> Self {
        Self { root, payloads }
    }

    /// Payloads for every matching file directly inside `dir`, sorted by name
    async fn collect_dir(&self, dir: &str, expected: DomainKind) -> Result<Vec<Value>> {
        let abs_dir = self.root.join(dir);
        let mut entries = match tokio::fs::read_dir(&abs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut out = Vec::new();
        for name in names {
            let rel = PathBuf::from(dir).join(&name);
            if match_path(&rel).map(|e| e.domain_kind) != Some(expected) {
                continue;
            }
            let abs = self.root.join(&rel);
            out.push(
                self.payloads
                    .build(&abs, &rel, EventKind::Modified, expected)
                    .await,
            );
        }
        Ok(out)
    }

    async fn single(&self, rel: &str, kind: DomainKind, absent: Value) -> Value {
        let abs = self.root.join(rel);
        if tokio::fs::metadata(&abs).await.is_err() {
            return absent;
        }
        self.payloads
            .build(&abs, Path::new(rel), EventKind::Modified, kind)
            .await
    }
}

#[async_trait]
impl SnapshotProvider for FsSnapshot {
    async fn fetch(&self) -> Result<Value> {
        // An unreadable root fails the snapshot outright
        tokio::fs::read_dir(&self.root).await?;

        let tasks = self.collect_dir("tasks", DomainKind::Task).await?;
        let reports = self.collect_dir("reports", DomainKind::Report).await?;
        let dashboard = self
            .single("dashboard.md", DomainKind::Dashboard, json!({ "content": "" }))
            .await;
        let commands = self
            .single("commands.yaml", DomainKind::Command, json!({ "commands": [] }))
            .await;
        let game_state = self
            .single("game_state.yaml", DomainKind::GameState, json!({ "state": null }))
            .await;

        Ok(json!({
            "tasks": tasks,
            "reports": reports,
            "dashboard": dashboard,
            "commands": commands,
            "gameState": game_state,
        }))
    }
}
