//! Upgrade routing
//!
//! ```text
//! Received ──► not an upgrade ───────────────► 404, close
//!          ├─► application path ─► authorize ─► Authorized (handshake + gate)
//!          │                                └─► Rejected (401/403, close)
//!          └─► any other path ─────────────────► Tunneled (secondary upstream)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::error::{RelayError, Result};
use crate::transport::Transport;

use super::auth::{authorize, rejection_response};
use super::connection::handle_connection;
use super::request::{read_request_head, status_only, RequestHead};
use super::tunnel::TunnelSession;

/// Where a request goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Application,
    Tunnel,
    NotUpgrade,
}

/// Whether `path` falls under the application upgrade prefix
pub fn is_application_path(path: &str, ws_path: &str) -> bool {
    let prefix = ws_path.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub fn classify(head: &RequestHead, ws_path: &str) -> RouteKind {
    if !head.is_upgrade() {
        RouteKind::NotUpgrade
    } else if is_application_path(head.path(), ws_path) {
        RouteKind::Application
    } else {
        RouteKind::Tunnel
    }
}

/// Route one raw TCP connection
pub async fn route_connection(stream: TcpStream, peer: SocketAddr, transport: Arc<Transport>) {
    route_stream(stream, Some(peer), transport).await;
}

/// Route any byte stream; used directly by tests
pub async fn route_stream<S>(mut stream: S, peer: Option<SocketAddr>, transport: Arc<Transport>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (head, leftover) = match read_request_head(&mut stream).await {
        Ok(parsed) => parsed,
        Err(e) => {
            if !e.is_benign() {
                tracing::debug!(?peer, error = %e, "Unreadable request head");
            }
            let _ = stream.shutdown().await;
            return;
        }
    };

    let server = &transport.config().server;
    match classify(&head, &server.ws_path) {
        RouteKind::NotUpgrade => {
            write_and_close(&mut stream, &status_only(404, "Not Found")).await;
        }
        RouteKind::Application => match authorize(&head, server) {
            Ok(()) => {
                if let Err(e) = accept_application(stream, &head, leftover, peer, transport).await {
                    if !e.is_benign() {
                        tracing::warn!(?peer, error = %e, "Handshake failed");
                    }
                }
            }
            Err(reason) => {
                tracing::info!(?peer, %reason, "Upgrade rejected");
                write_and_close(&mut stream, &rejection_response(reason)).await;
            }
        },
        RouteKind::Tunnel => {
            tracing::debug!(?peer, uri = %head.target, "Tunneling upgrade");
            let config = transport.config().tunnel.clone();
            TunnelSession::new(stream).run(head, leftover, &config).await;
        }
    }
}

async fn write_and_close<S: AsyncWrite + Unpin>(stream: &mut S, response: &str) {
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Complete the WebSocket handshake and hand the connection to the gate
async fn accept_application<S>(
    mut stream: S,
    head: &RequestHead,
    leftover: Vec<u8>,
    peer: Option<SocketAddr>,
    transport: Arc<Transport>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Some(key) = head.header("sec-websocket-key") else {
        write_and_close(&mut stream, &status_only(400, "Bad Request")).await;
        return Err(RelayError::Protocol {
            message: "missing Sec-WebSocket-Key".to_string(),
        });
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    let ws = WebSocketStream::from_partially_read(stream, leftover, Role::Server, None).await;
    handle_connection(ws, transport, peer).await;
    Ok(())
}
