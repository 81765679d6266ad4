//! TestRoot builder for watch-root fixtures

use std::fs;
use std::path::PathBuf;

use live_relay::RelayConfig;
use tempfile::TempDir;

/// Temporary watch root with helpers for laying out state files
pub struct TestRoot {
    dir: TempDir,
}

impl TestRoot {
    /// Create a new empty root
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Canonical path of the root
    pub fn path(&self) -> PathBuf {
        self.dir
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp dir")
    }

    /// Absolute path of a file under the root
    pub fn abs(&self, relative_path: &str) -> PathBuf {
        self.path().join(relative_path)
    }

    /// Write a file, creating parent directories
    pub fn add_file(&self, relative_path: &str, content: &str) -> &Self {
        let full_path = self.dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        self
    }

    /// Remove a file
    pub fn remove_file(&self, relative_path: &str) -> &Self {
        fs::remove_file(self.dir.path().join(relative_path)).expect("Failed to remove file");
        self
    }

    /// Create a directory
    pub fn add_dir(&self, relative_path: &str) -> &Self {
        fs::create_dir_all(self.dir.path().join(relative_path)).expect("Failed to create dir");
        self
    }

    /// Default config pointed at this root
    pub fn config(&self) -> RelayConfig {
        let mut config = RelayConfig::default();
        config.watch.root = self.path();
        config
    }

    /// Root with a typical state layout
    pub fn with_state() -> Self {
        let root = Self::new();
        root.add_file("tasks/ashigaru1.yaml", "task:\n  status: assigned\n")
            .add_file("tasks/ashigaru2.yaml", "task:\n  status: idle\n")
            .add_file("reports/report_1.yaml", "result: done\n")
            .add_file("dashboard.md", "# Dashboard\n")
            .add_file("commands.yaml", "commands:\n  - id: cmd_1\n")
            .add_file("game_state.yaml", "turn: 3\n");
        root
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}
