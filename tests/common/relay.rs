//! Running relays and talking to them

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use live_relay::gateway::serve;
use live_relay::Transport;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ORIGIN: &str = "http://localhost:3000";

/// Serve `transport` on an ephemeral port for the rest of the test
pub async fn start_relay(transport: Arc<Transport>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(serve(listener, transport, std::future::pending()));
    addr
}

/// Open an application connection with an allowed origin
pub async fn connect_client(addr: SocketAddr, target: &str) -> Client {
    let mut request = format!("ws://{}{}", addr, target)
        .into_client_request()
        .expect("Bad client request");
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static(ORIGIN));
    let (ws, _) = connect_async(request).await.expect("Failed to connect");
    ws
}

/// Next text frame as JSON, failing after two seconds
pub async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("Frame is not JSON");
        }
    }
}

/// Whether another text frame arrives within `wait`
pub async fn has_more(ws: &mut Client, wait: Duration) -> bool {
    matches!(
        tokio::time::timeout(wait, ws.next()).await,
        Ok(Some(Ok(Message::Text(_))))
    )
}

/// Raw upgrade request head
pub fn upgrade_request(target: &str, origin: Option<&str>) -> String {
    let mut req = format!(
        "GET {} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
        target
    );
    if let Some(origin) = origin {
        req.push_str(&format!("Origin: {}\r\n", origin));
    }
    req.push_str("\r\n");
    req
}

/// Send raw bytes and read until the server closes
pub async fn raw_exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("Failed to write");
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut out))
        .await
        .expect("Server did not close")
        .expect("Read failed");
    String::from_utf8_lossy(&out).into_owned()
}
