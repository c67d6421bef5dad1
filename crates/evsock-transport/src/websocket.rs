//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.
//! Each accepted stream is split: a writer task drains an unbounded queue into
//! the sink so that [`Socket::send`] never blocks, and the read half is handed
//! to the caller as an [`Inbound`].

use async_trait::async_trait;
use bytes::Bytes;
use evsock_protocol::{Frame, ProtocolError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Error as WsError, Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{
    Accepted, CloseInfo, Inbound, ReadyState, SharedReadyState, Socket, Transport, TransportError,
};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let mut headers = Vec::new();
        let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            headers.extend(request.headers().iter().map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            }));
            Ok(response)
        };

        let ws_stream = accept_hdr_async(stream, capture).await.map_err(|e| {
            error!("WebSocket handshake failed: {}", e);
            TransportError::Handshake(e.to_string())
        })?;

        debug!("WebSocket handshake completed with {}", addr);

        let (socket, inbound) = split_connection(ws_stream, addr, self.config.max_message_size);
        Ok(Accepted {
            socket,
            inbound: Box::new(inbound),
            headers,
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Split a WebSocket stream into a shared socket and an inbound reader.
fn split_connection(
    stream: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
    max_message_size: usize,
) -> (Arc<WebSocketSocket>, WebSocketInbound) {
    let (sink, stream) = stream.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let state = SharedReadyState::new(ReadyState::Open);

    tokio::spawn(write_loop(sink, rx, state.clone()));

    let socket = Arc::new(WebSocketSocket {
        tx: tx.clone(),
        state: state.clone(),
        remote_addr,
    });
    let inbound = WebSocketInbound {
        stream,
        tx,
        state,
        close_info: None,
        max_message_size,
    };

    (socket, inbound)
}

/// Drain queued messages into the sink until the queue or the sink closes.
async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    state: SharedReadyState,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("WebSocket write failed: {}", e);
            state.set(ReadyState::Closed);
            break;
        }
        if closing {
            break;
        }
    }
}

/// Writable half of a WebSocket connection.
pub struct WebSocketSocket {
    tx: mpsc::UnboundedSender<Message>,
    state: SharedReadyState,
    remote_addr: SocketAddr,
}

impl Socket for WebSocketSocket {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
        };

        self.tx
            .send(message)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.state.begin_close() {
            return Ok(()); // Already closing or closed
        }

        self.tx
            .send(Message::Close(None))
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }
}

/// Readable half of a WebSocket connection.
pub struct WebSocketInbound {
    stream: SplitStream<WebSocketStream<TcpStream>>,
    tx: mpsc::UnboundedSender<Message>,
    state: SharedReadyState,
    close_info: Option<CloseInfo>,
    max_message_size: usize,
}

impl WebSocketInbound {
    fn finish(&mut self, info: CloseInfo) {
        self.state.set(ReadyState::Closed);
        self.close_info.get_or_insert(info);
    }

    /// Reject frames over the configured size. The connection stays usable.
    fn limit(&self, frame: Frame) -> Result<Frame, TransportError> {
        if frame.len() > self.max_message_size {
            warn!(
                size = frame.len(),
                max = self.max_message_size,
                kind = %frame.kind(),
                "Dropping oversized message"
            );
            return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(
                frame.len(),
            )));
        }
        Ok(frame)
    }
}

#[async_trait]
impl Inbound for WebSocketInbound {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return self.limit(Frame::Text(text)).map(Some);
                }
                Some(Ok(Message::Binary(data))) => {
                    return self.limit(Frame::Binary(Bytes::from(data))).map(Some);
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.tx.send(Message::Pong(data)) {
                        warn!("Failed to queue pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!("Received close frame");
                    let info = frame
                        .map(|f| CloseInfo::new(u16::from(f.code), f.reason.to_string()))
                        .unwrap_or_default();
                    self.finish(info);
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    return Err(TransportError::UnsupportedFrame("raw frame".into()));
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    self.finish(CloseInfo::default());
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.finish(CloseInfo::new(1006, e.to_string()));
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.finish(CloseInfo::default());
                    return Ok(None);
                }
            }
        }
    }

    fn close_info(&self) -> Option<CloseInfo> {
        self.close_info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let transport = WebSocketTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(transport.name(), "websocket");
    }
}
