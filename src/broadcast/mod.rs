//! Broadcast batching and per-client ordering
//!
//! ```text
//! enqueue ──► BatchState { pending, flush_armed, last_sequence }
//!                 │ (flush window timer)
//!                 ▼
//!              flush ──► for each connected client ──► ClientSyncState
//!                                                       ├─ Open:      send now
//!                                                       └─ Deferring: hold until
//!                                                                     initial_state sent
//! ```

pub mod coordinator;
pub mod gate;
pub mod protocol;
pub mod snapshot;

pub use coordinator::{BroadcastCoordinator, ClientFrame, ClientId};
pub use gate::{ClientSyncState, Route};
pub use protocol::{ClientMessage, DomainType, OutboundMessage};
pub use snapshot::{FsSnapshot, SnapshotProvider};
