//! File system change source
//!
//! Uses `notify-debouncer-mini` so a burst of writes to one path collapses into
//! a single notification after the quiet period. The debouncer only reports
//! that a path changed, so each path is classified against the set of files
//! known to exist:
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   notify    │────>│  debouncer  │────>│  classifier  │────>│ tokio mpsc   │
//! │   watcher   │     │ (quiet per.)│     │ added/mod/rm │     │ (pipeline)   │
//! └─────────────┘     └─────────────┘     └──────────────┘     └──────────────┘
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ignore::WalkBuilder;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{
    new_debouncer_opt, Config as DebouncerConfig, DebounceEventResult, DebouncedEventKind,
    Debouncer,
};
use tokio::sync::mpsc;

use crate::error::{RelayError, Result};

/// What happened to a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Modified,
    Removed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Added => write!(f, "added"),
            EventKind::Modified => write!(f, "modified"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// One debounced change to one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNotification {
    pub kind: EventKind,
    pub absolute_path: PathBuf,
}

/// Items delivered by the change source
pub type SourceItem = std::result::Result<WatchNotification, RelayError>;

/// Configuration for the change source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Quiet period before a burst of writes is reported
    pub stability_threshold: Duration,
    /// Poll interval used by polling backends
    pub poll_interval: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stability_threshold: Duration::from_millis(300),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Tracks which files exist so bare "changed" reports can be classified
#[derive(Debug, Default)]
pub struct Classifier {
    known: HashSet<PathBuf>,
}

impl Classifier {
    /// Seed the known set from the files currently under `root`
    pub fn seeded(root: &Path) -> Self {
        let known = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(false)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(|entry| entry.into_path())
            .collect();
        Self { known }
    }

    /// Classify a changed path given whether it exists and is a file right now
    pub fn classify(&mut self, path: &Path, is_file: bool, exists: bool) -> Option<EventKind> {
        if !exists {
            return self.known.remove(path).then_some(EventKind::Removed);
        }
        if !is_file {
            return None;
        }
        if self.known.insert(path.to_path_buf()) {
            Some(EventKind::Added)
        } else {
            Some(EventKind::Modified)
        }
    }

    #[cfg(test)]
    fn is_known(&self, path: &Path) -> bool {
        self.known.contains(path)
    }
}

/// Check whether a path lies under a hidden component relative to the root
fn is_hidden(path: &Path, root: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().any(|c| match c {
        std::path::Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Debounced directory-tree watcher
pub struct ChangeSource {
    root: PathBuf,
    config: SourceConfig,
}

impl ChangeSource {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            config: SourceConfig::default(),
        }
    }

    pub fn with_config(root: PathBuf, config: SourceConfig) -> Self {
        Self { root, config }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start watching, delivering notifications and watcher errors to `tx`
    ///
    /// Files present at start are not reported. Watching stops when the
    /// returned handle is dropped.
    pub fn start(&self, tx: mpsc::UnboundedSender<SourceItem>) -> Result<SourceHandle> {
        let root = self.root.canonicalize()?;
        let mut classifier = Classifier::seeded(&root);
        let walk_root = root.clone();

        let config = DebouncerConfig::default()
            .with_timeout(self.config.stability_threshold)
            .with_notify_config(
                notify::Config::default().with_poll_interval(self.config.poll_interval),
            );

        let handler = move |result: DebounceEventResult| match result {
            Ok(events) => {
                tracing::debug!("[WATCHER] Received {} raw events", events.len());
                for event in events {
                    if !matches!(
                        event.kind,
                        DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                    ) {
                        continue;
                    }
                    if is_hidden(&event.path, &walk_root) {
                        continue;
                    }
                    let meta = std::fs::metadata(&event.path);
                    let exists = meta.is_ok();
                    let is_file = meta.map(|m| m.is_file()).unwrap_or(false);
                    if let Some(kind) = classifier.classify(&event.path, is_file, exists) {
                        tracing::debug!(path = %event.path.display(), %kind, "[WATCHER] change");
                        let _ = tx.send(Ok(WatchNotification {
                            kind,
                            absolute_path: event.path,
                        }));
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(RelayError::from(e)));
            }
        };

        let mut debouncer = new_debouncer_opt::<_, notify::RecommendedWatcher>(config, handler)?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        tracing::info!(root = %root.display(), "Watching for changes");
        Ok(SourceHandle {
            root,
            _debouncer: debouncer,
        })
    }
}

/// Keeps the underlying watcher alive
pub struct SourceHandle {
    root: PathBuf,
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl SourceHandle {
    /// Canonical root being watched
    pub fn root(&self) -> &Path {
        &self.root
    }
}
