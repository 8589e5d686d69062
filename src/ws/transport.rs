//! Transport abstraction over the provider channel
//!
//! The manager only needs a message-oriented, ordered, full-duplex channel:
//! open, send, receive, close. `WsConnector`/`WsTransport` implement it with
//! tokio-tungstenite; tests substitute an in-memory connector.

use crate::ws::frame::Frame;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

use futures_util::{SinkExt, StreamExt};

/// Errors that can occur on the provider channel
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Timeout")]
    Timeout,
    #[error("Codec error: {0}")]
    Codec(String),
}

/// One open channel to a provider
///
/// `recv` returning `Ok(None)` means the peer closed the channel gracefully.
/// Implementations must be cancel-safe in `recv`: dropping the future must
/// not lose a fully received frame.
pub trait Transport: Send + 'static {
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn recv(&mut self) -> impl Future<Output = Result<Option<Frame>, TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Factory for provider channels, one `open` per (re)connection attempt
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn open(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// WebSocket connector using tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn open(&self, url: &str) -> Result<WsTransport, TransportError> {
        let connect_future = connect_async(url);
        let (ws_stream, _) = timeout(self.connect_timeout, connect_future)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Plain TCP only; TLS streams keep their defaults
        if let MaybeTlsStream::Plain(ref tcp) = ws_stream.get_ref() {
            optimize_tcp_stream(tcp)?;
        }

        Ok(WsTransport { stream: ws_stream })
    }
}

/// Disable Nagle's algorithm so small frames go out immediately
fn optimize_tcp_stream(stream: &TcpStream) -> Result<(), TransportError> {
    stream
        .set_nodelay(true)
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
}

/// WebSocket transport over tokio-tungstenite
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let text = frame.encode()?;
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match Frame::decode(text.as_str()) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable frame");
                    }
                },
                Some(Ok(Message::Binary(data))) => {
                    match std::str::from_utf8(&data).ok().map(Frame::decode) {
                        Some(Ok(frame)) => return Ok(Some(frame)),
                        _ => tracing::warn!("dropping undecodable binary frame"),
                    }
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                // WebSocket-level ping/pong is answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
