//! Per-client WebSocket session
//!
//! A session registers with the coordinator with its gate already closed and
//! fetches the snapshot on a separate task. Frames released by the coordinator
//! arrive on an unbounded channel and are written in channel order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::protocol::{ClientMessage, PONG_FRAME};
use crate::broadcast::{ClientFrame, ClientId};
use crate::error::RelayError;
use crate::transport::Transport;

/// Serve one authorized WebSocket until either side closes
pub async fn handle_connection<S>(
    ws: WebSocketStream<S>,
    transport: Arc<Transport>,
    peer: Option<SocketAddr>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = Arc::clone(transport.coordinator());
    let (client_id, anchor) = coordinator.register_deferring(tx);
    tracing::info!(%client_id, ?peer, anchor, "Client connected, fetching initial snapshot");

    {
        let transport = Arc::clone(&transport);
        let id = client_id.clone();
        tokio::spawn(async move {
            let snapshot = transport
                .snapshots()
                .fetch()
                .await
                .map_err(|e| e.to_string());
            transport.coordinator().complete_initial_sync(&id, snapshot);
        });
    }

    let mut session = Session {
        ws,
        rx,
        client_id: client_id.clone(),
    };
    session.run().await;

    coordinator.unregister(&client_id);
    let _ = session.ws.close(None).await;
    tracing::info!(%client_id, ?peer, "Client disconnected");
}

struct Session<S> {
    ws: WebSocketStream<S>,
    rx: mpsc::UnboundedReceiver<ClientFrame>,
    client_id: ClientId,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(&mut self) {
        loop {
            tokio::select! {
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_text(&text).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::debug!(client_id = %self.client_id, error = %e, "WebSocket read failed");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                frame = self.rx.recv() => {
                    match frame {
                        Some(ClientFrame::Text(text)) => {
                            if let Err(e) = self.ws.send(Message::Text(text)).await {
                                if !is_benign_ws(&e) {
                                    let err = RelayError::Send {
                                        client_id: self.client_id.clone(),
                                        message: e.to_string(),
                                    };
                                    tracing::warn!(error = %err, "Dropping client");
                                }
                                break;
                            }
                        }
                        Some(ClientFrame::Close) | None => break,
                    }
                }
            }
        }
    }

    /// Returns false when the session should end
    async fn handle_text(&mut self, text: &str) -> bool {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => self
                .ws
                .send(Message::Text(PONG_FRAME.to_string()))
                .await
                .is_ok(),
            Err(_) => {
                tracing::trace!(client_id = %self.client_id, "Ignoring unknown client message");
                true
            }
        }
    }
}

fn is_benign_ws(err: &tokio_tungstenite::tungstenite::Error) -> bool {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::ConnectionClosed | Error::AlreadyClosed => true,
        Error::Io(io) => crate::error::is_benign_io(io),
        _ => false,
    }
}
