//! Duplicate notification suppression
//!
//! Some platforms report a single logical write more than once. A notification
//! is suppressed when the same path and event kind were seen with an identical
//! fingerprint within the dedupe window. The fingerprint mixes the modification
//! time with a content hash, so a genuine rewrite inside one filesystem clock
//! tick is still admitted.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use super::watcher::EventKind;

/// Fingerprint used for every removal
pub const REMOVED_FINGERPRINT: &str = "removed";

/// Fingerprint used when the resource cannot be stat'ed or read
pub const UNREADABLE_FINGERPRINT: &str = "unreadable";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupeKey {
    path: String,
    kind: EventKind,
    fingerprint: String,
}

/// Time-windowed duplicate filter
pub struct DedupeFilter {
    window: Duration,
    entries: Mutex<HashMap<DedupeKey, Instant>>,
}

impl DedupeFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Fingerprint the resource and decide whether this notification is a repeat
    pub async fn should_skip(&self, abs_path: &Path, rel_path: &str, kind: EventKind) -> bool {
        let fingerprint = fingerprint(abs_path, kind).await;
        self.check(rel_path, kind, fingerprint, Instant::now())
    }

    /// Record an observation at `now` and report whether it duplicates a recent one
    pub fn check(&self, rel_path: &str, kind: EventKind, fingerprint: String, now: Instant) -> bool {
        let mut entries = self.entries.lock();

        let horizon = self.window * 3;
        entries.retain(|_, seen| now.saturating_duration_since(*seen) <= horizon);

        let key = DedupeKey {
            path: rel_path.to_string(),
            kind,
            fingerprint,
        };
        let skip = entries
            .get(&key)
            .is_some_and(|seen| now.saturating_duration_since(*seen) <= self.window);

        entries.insert(key, now);
        skip
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Compute the dedupe fingerprint of a resource
///
/// The file is stat'ed and read separately from the payload build; the second
/// read is accepted in exchange for a fingerprint that reflects real content.
pub async fn fingerprint(abs_path: &Path, kind: EventKind) -> String {
    if kind == EventKind::Removed {
        return REMOVED_FINGERPRINT.to_string();
    }

    let meta = match tokio::fs::metadata(abs_path).await {
        Ok(m) => m,
        Err(_) => return UNREADABLE_FINGERPRINT.to_string(),
    };
    let bytes = match tokio::fs::read(abs_path).await {
        Ok(b) => b,
        Err(_) => return UNREADABLE_FINGERPRINT.to_string(),
    };

    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let digest = hex::encode(Sha256::digest(&bytes));
    format!("{}:{}", mtime_ms, digest)
}
