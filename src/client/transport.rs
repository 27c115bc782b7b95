//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to a WebSocket and send/receive text
//! frames. No knowledge of the realtime protocol, batching, or security.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::RealtimeError;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, WsMessage>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A connected WebSocket transport.
///
/// Represents a raw socket with no protocol knowledge. It can only be
/// constructed via `Transport::connect()`, so holding one means the
/// upgrade completed.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to a WebSocket endpoint.
    ///
    /// Returns a Transport only when the connection is established.
    pub async fn connect(url: &str) -> Result<Self, RealtimeError> {
        debug!(url = %url, "Connecting to WebSocket");

        let request = Request::builder()
            .uri(url)
            .header("Host", extract_host(url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| RealtimeError::Transport(format!("failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| RealtimeError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "WebSocket connected");
        Ok(Self { sink, stream })
    }

    /// Send a text frame.
    pub async fn send(&mut self, text: String) -> Result<(), RealtimeError> {
        self.sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| RealtimeError::Transport(format!("failed to send: {}", e)))
    }

    /// Receive the next text frame.
    ///
    /// Returns None if the connection is closed.
    /// Skips non-text frames (ping/pong handled by the library).
    pub async fn recv(&mut self) -> Result<Option<String>, RealtimeError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(RealtimeError::Transport(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }

    /// Split into separate sink and stream for concurrent send/receive.
    pub fn split(self) -> (WsSink, WsStream) {
        (self.sink, self.stream)
    }
}

/// Extract host from URL for the Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .and_then(|s| s.split('?').next())
        .unwrap_or("localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("ws://localhost:8080"), "localhost:8080");
        assert_eq!(extract_host("wss://realtime.example.com/ws"), "realtime.example.com");
        assert_eq!(extract_host("ws://host:1?token=x"), "host:1");
        assert_eq!(extract_host("invalid"), "localhost");
    }
}
