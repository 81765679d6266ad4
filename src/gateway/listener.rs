//! Accept loop

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::transport::Transport;

use super::router::route_connection;

/// Accept connections until `shutdown` resolves
///
/// Each connection is routed on its own task. Accept errors are logged and the
/// loop keeps going.
pub async fn serve<F>(listener: TcpListener, transport: Arc<Transport>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down listener");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "Accepted connection");
                    let _ = stream.set_nodelay(true);
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        route_connection(stream, peer, transport).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}
