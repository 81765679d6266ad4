//! live-relay: file-backed state relay over WebSocket
//!
//! Watches a directory of YAML and Markdown state files, turns each change
//! into a typed message, and fans it out to connected clients in one total
//! order. Each client first receives a snapshot of the full state, then only
//! the messages the snapshot does not already reflect.
//!
//! # Architecture
//!
//! ```text
//!  queue/                      ┌────────────────────────── Transport ───────────────────────────┐
//!  ├─ tasks/*.yaml    notify   │                                                                 │
//!  ├─ reports/*.yaml ────────► │ ingest ─► matcher ─► dedupe ─► payload ─► BroadcastCoordinator │
//!  ├─ dashboard.md             │                                             │ (batch + seq)     │
//!  ├─ commands.yaml            │                                             ▼                   │
//!  └─ game_state.yaml          │                        per-client gate ─► connection task ─────┼──► ws://host/ws
//!                              └─────────────────────────────────────────────────────────────────┘
//!
//!  other upgrade paths ──► tunnel ──► secondary upstream (e.g. dev server HMR)
//! ```
//!
//! # Modules
//!
//! - [`ingest`] - change detection through to enqueue
//! - [`broadcast`] - batching, sequencing, per-client ordering
//! - [`gateway`] - upgrade routing, authorization, tunneling
//! - [`transport`] - the instance that owns all of the above
//! - [`config`] - TOML configuration
//! - [`cli`] - daemon flags

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod transport;

pub use broadcast::{BroadcastCoordinator, DomainType, FsSnapshot, OutboundMessage, SnapshotProvider};
pub use cli::Cli;
pub use config::RelayConfig;
pub use error::{RelayError, Result, UpgradeAuthError};
pub use ingest::{ChangeSource, EventKind, IngestPipeline};
pub use transport::Transport;
