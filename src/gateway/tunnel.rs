//! Manual upgrade tunnel to the secondary upstream
//!
//! The original request head is forwarded to the upstream. If the upstream
//! switches protocols, its status line and headers are written back to the
//! client, bytes buffered on either side are relayed, and the two sockets are
//! spliced until one closes. Any other upstream response is relayed and the
//! session ends.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::TunnelConfig;
use crate::error::{RelayError, Result};

use super::request::{read_response_head, status_only, RequestHead};

/// One proxied client/upstream socket pair
pub struct TunnelSession<C> {
    client: Option<C>,
    upstream: Option<TcpStream>,
    /// Upstream response head has started reaching the client
    responded: bool,
    cleaned_up: bool,
}

impl<C> TunnelSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: C) -> Self {
        Self {
            client: Some(client),
            upstream: None,
            responded: false,
            cleaned_up: false,
        }
    }

    /// Session with an already connected upstream
    pub fn with_upstream(client: C, upstream: TcpStream) -> Self {
        Self {
            upstream: Some(upstream),
            ..Self::new(client)
        }
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// Relay one upgrade request to the upstream, then tear everything down
    pub async fn run(mut self, head: RequestHead, leftover: Vec<u8>, config: &TunnelConfig) {
        let uri = head.target.clone();
        if let Err(e) = self.relay(head, leftover, config).await {
            if !e.is_benign() {
                tracing::warn!(%uri, error = %e, "Tunnel session failed");
            }
            if !self.responded {
                self.write_client(status_only(502, "Bad Gateway").as_bytes())
                    .await;
            }
        }
        self.cleanup().await;
    }

    async fn relay(
        &mut self,
        head: RequestHead,
        leftover: Vec<u8>,
        config: &TunnelConfig,
    ) -> Result<()> {
        if self.upstream.is_none() {
            let addr = config.upstream_addr();
            let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&addr))
                .await
                .map_err(|_| RelayError::Tunnel {
                    message: format!("connect to {} timed out", addr),
                })?
                .map_err(|e| RelayError::Tunnel {
                    message: format!("connect to {} failed: {}", addr, e),
                })?;
            self.upstream = Some(stream);
        }

        let (Some(client), Some(upstream)) = (self.client.as_mut(), self.upstream.as_mut()) else {
            return Err(RelayError::Tunnel {
                message: "session already torn down".to_string(),
            });
        };

        upstream.write_all(&head.to_bytes()).await?;
        if !leftover.is_empty() {
            upstream.write_all(&leftover).await?;
        }

        let (response, extra) = read_response_head(upstream)
            .await
            .map_err(upstream_response_error)?;

        self.responded = true;
        client.write_all(&response.to_bytes()).await?;
        if !extra.is_empty() {
            client.write_all(&extra).await?;
        }

        if response.is_switching_protocols() {
            tracing::debug!(uri = %head.target, "Tunnel upgraded, splicing");
            let (up, down) = tokio::io::copy_bidirectional(client, upstream).await?;
            tracing::debug!(uri = %head.target, up, down, "Tunnel closed");
        } else {
            match response.content_length() {
                Some(len) => {
                    let remaining = len.saturating_sub(extra.len() as u64);
                    tokio::io::copy(&mut upstream.take(remaining), client).await?;
                }
                None => {
                    tokio::io::copy(upstream, client).await?;
                }
            }
            client.flush().await?;
        }
        Ok(())
    }

    async fn write_client(&mut self, bytes: &[u8]) {
        if let Some(client) = self.client.as_mut() {
            if let Err(e) = client.write_all(bytes).await {
                if !crate::error::is_benign_io(&e) {
                    tracing::warn!(error = %e, "Failed to write to tunnel client");
                }
            }
        }
    }

    /// Tear down both sockets exactly once
    ///
    /// Returns true only for the call that performed the teardown.
    pub async fn cleanup(&mut self) -> bool {
        if self.cleaned_up {
            return false;
        }
        self.cleaned_up = true;

        if let Some(mut client) = self.client.take() {
            let _ = client.shutdown().await;
        }
        if let Some(mut upstream) = self.upstream.take() {
            let _ = upstream.shutdown().await;
        }
        true
    }
}

/// Socket errors stay `Io` so resets and broken pipes remain benign
fn upstream_response_error(err: RelayError) -> RelayError {
    match err {
        RelayError::Io(io) => RelayError::Io(io),
        other => RelayError::Tunnel {
            message: format!("upstream response: {}", other),
        },
    }
}
