//! Thin wrapper around `tokio-tungstenite`.
//!
//! The supervisor owns the read half directly; the write half is shared
//! (behind an `Arc<Mutex<_>>`) between the supervisor and the send worker,
//! the same split `titan-sync::transport::Transport` uses so that an
//! independent sender task can push frames without routing them through
//! the connection's own event loop.

use std::fmt;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// Shared handle to the write half of an open connection.
#[derive(Clone)]
pub struct TransportHandle {
    sink: Arc<Mutex<WsSink>>,
}

impl TransportHandle {
    /// Sends a text frame. Fails if the underlying socket has gone away.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] on a write failure.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(&payload).into_owned();
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    /// Idempotent close: a second call on an already-closed sink is a no-op error
    /// we deliberately swallow at the call site.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] if the close frame could not be written.
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.close().await.map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[derive(Debug)]
pub enum TransportError {
    /// The WebSocket handshake failed.
    Connect(String),
    /// The connection attempt exceeded the configured timeout.
    ConnectTimeout,
    /// A write to an established socket failed.
    Send(String),
    /// The connection closed (locally or remotely) while performing an operation.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "websocket connect error: {msg}"),
            Self::ConnectTimeout => write!(f, "websocket connect timed out"),
            Self::Send(msg) => write!(f, "websocket send error: {msg}"),
            Self::Closed => write!(f, "websocket connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Connects to `url` with the session's identifying headers attached, bounded
/// by `connect_timeout`. Splits the resulting stream into a shared write
/// handle and an owned read half.
///
/// # Errors
///
/// Returns [`TransportError::ConnectTimeout`] if the handshake does not
/// complete in time, or [`TransportError::Connect`] if it fails outright.
pub async fn connect(
    url: &str,
    identifier: &str,
    last_connected_at: &str,
    connect_timeout: Duration,
) -> Result<(TransportHandle, WsSource), TransportError> {
    let request = build_request(url, identifier, last_connected_at)?;

    let connect_fut = tokio_tungstenite::connect_async(request);
    let (stream, _response) = match tokio::time::timeout(connect_timeout, connect_fut).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
        Err(_) => return Err(TransportError::ConnectTimeout),
    };

    let (sink, source) = stream.split();
    Ok((
        TransportHandle {
            sink: Arc::new(Mutex::new(sink)),
        },
        source,
    ))
}

fn build_request(
    url: &str,
    identifier: &str,
    last_connected_at: &str,
) -> Result<Request<()>, TransportError> {
    Request::builder()
        .uri(url)
        .header("Host", host_from_url(url))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .header("identifier", identifier)
        .header("last-connected-at", last_connected_at)
        .body(())
        .map_err(|e| TransportError::Connect(e.to_string()))
}

fn host_from_url(url: &str) -> &str {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_from_url_strips_scheme_and_path() {
        assert_eq!(host_from_url("ws://localhost:9/ws"), "localhost:9");
        assert_eq!(host_from_url("wss://example.com/path/to/ep"), "example.com");
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            TransportError::Connect("refused".into()).to_string(),
            "websocket connect error: refused"
        );
        assert_eq!(TransportError::ConnectTimeout.to_string(), "websocket connect timed out");
        assert_eq!(TransportError::Closed.to_string(), "websocket connection closed");
    }
}
