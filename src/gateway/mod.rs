//! HTTP upgrade gateway
//!
//! Every inbound connection is read up to the end of its request head and then
//! routed:
//!
//! ```text
//! ┌──────────┐   ┌────────┐   upgrade on ws_path    ┌──────┐   ┌────────────┐
//! │ listener │──>│ router │────────────────────────>│ auth │──>│ connection │
//! └──────────┘   └────────┘                         └──────┘   └────────────┘
//!                    │       upgrade elsewhere      ┌────────┐
//!                    ├─────────────────────────────>│ tunnel │──> upstream
//!                    │                              └────────┘
//!                    └── plain request ──> 404
//! ```
//!
//! # Modules
//!
//! - `request` - raw HTTP head parsing
//! - `auth` - origin allow-list and shared secret
//! - `router` - upgrade classification and WebSocket handshake
//! - `connection` - per-client session loop
//! - `tunnel` - upgrade proxying to the secondary upstream
//! - `listener` - accept loop

pub mod auth;
pub mod connection;
pub mod listener;
pub mod request;
pub mod router;
pub mod tunnel;

pub use auth::authorize;
pub use connection::handle_connection;
pub use listener::serve;
pub use request::{RequestHead, ResponseHead};
pub use router::{classify, route_connection, route_stream, RouteKind};
pub use tunnel::TunnelSession;
