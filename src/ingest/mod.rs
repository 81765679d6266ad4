//! Filesystem-to-event ingestion
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌─────────────┐
//! │ ChangeSource │──>│ matcher  │──>│  dedupe  │──>│ payload  │──>│ coordinator │
//! │ (debounced)  │   │ path→type│   │ 300ms fp │   │ 1 retry  │   │  enqueue    │
//! └──────────────┘   └──────────┘   └──────────┘   └──────────┘   └─────────────┘
//! ```
//!
//! # Modules
//!
//! - `watcher` - debounced directory watching
//! - `matcher` - path to message type mapping
//! - `dedupe` - duplicate notification suppression
//! - `payload` - payload construction with parse retry
//! - `pipeline` - bounded per-path dispatch

pub mod dedupe;
pub mod matcher;
pub mod payload;
pub mod pipeline;
pub mod watcher;

pub use dedupe::DedupeFilter;
pub use matcher::{match_path, DomainKind, SemanticEvent};
pub use payload::PayloadBuilder;
pub use pipeline::IngestPipeline;
pub use watcher::{ChangeSource, EventKind, SourceConfig, SourceHandle, WatchNotification};
