//! In-memory transport.
//!
//! Connections are pairs of unbounded channels. Useful for tests and for
//! embedding the event layer in-process without a network.

use async_trait::async_trait;
use evsock_protocol::Frame;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::traits::{
    Accepted, CloseInfo, Inbound, ReadyState, SharedReadyState, Socket, Transport, TransportError,
};

/// State shared by the three halves of an in-memory connection.
#[derive(Debug, Clone)]
struct Link {
    state: SharedReadyState,
    closed: Arc<Notify>,
    close_info: Arc<Mutex<Option<CloseInfo>>>,
}

impl Link {
    fn new() -> Self {
        Self {
            state: SharedReadyState::new(ReadyState::Open),
            closed: Arc::new(Notify::new()),
            close_info: Arc::new(Mutex::new(None)),
        }
    }

    fn shut(&self, info: CloseInfo) {
        self.close_info.lock().get_or_insert(info);
        self.state.set(ReadyState::Closed);
        self.closed.notify_one();
    }
}

/// Server-side writable half of an in-memory connection.
#[derive(Debug)]
pub struct MemorySocket {
    outbound: mpsc::UnboundedSender<Frame>,
    link: Link,
}

impl Socket for MemorySocket {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.link.state.begin_close() {
            debug!("Closing in-memory socket");
            self.link.shut(CloseInfo::new(1000, ""));
        }
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.link.state.get()
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Server-side readable half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryInbound {
    inbound: mpsc::UnboundedReceiver<Frame>,
    link: Link,
}

#[async_trait]
impl Inbound for MemoryInbound {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            // Frames queued before the close are still delivered, in order.
            if let Ok(frame) = self.inbound.try_recv() {
                return Ok(Some(frame));
            }
            if self.link.state.get() == ReadyState::Closed {
                return Ok(None);
            }

            tokio::select! {
                biased;

                frame = self.inbound.recv() => {
                    if frame.is_none() {
                        self.link.shut(CloseInfo::default());
                    }
                    return Ok(frame);
                }
                () = self.link.closed.notified() => {}
            }
        }
    }

    fn close_info(&self) -> Option<CloseInfo> {
        self.link.close_info.lock().clone()
    }
}

/// Client side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<Frame>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
    link: Link,
}

impl MemoryPeer {
    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        match &self.to_server {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// Wait for the next frame sent by the server.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.recv().await
    }

    /// Take every frame the server has sent so far.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_server.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Override the ready state observed by the server.
    pub fn set_ready_state(&self, state: ReadyState) {
        self.link.state.set(state);
    }

    /// Close the connection from the client side.
    pub fn close(&mut self, code: u16, reason: &str) {
        self.to_server = None;
        self.link.shut(CloseInfo::new(code, reason));
    }

    /// Whether either side closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.state.get() == ReadyState::Closed
    }
}

/// Create a connected in-memory socket triple.
#[must_use]
pub fn socket_pair() -> (Arc<MemorySocket>, MemoryInbound, MemoryPeer) {
    let (to_client, from_server) = mpsc::unbounded_channel();
    let (to_server, inbound) = mpsc::unbounded_channel();
    let link = Link::new();

    let socket = Arc::new(MemorySocket {
        outbound: to_client,
        link: link.clone(),
    });
    let inbound = MemoryInbound {
        inbound,
        link: link.clone(),
    };
    let peer = MemoryPeer {
        to_server: Some(to_server),
        from_server,
        link,
    };

    (socket, inbound, peer)
}

/// In-memory transport fed by a [`MemoryConnector`].
pub struct MemoryTransport {
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Accepted>>,
}

/// Opens connections to a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<Accepted>,
}

impl MemoryConnector {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has been dropped.
    pub fn connect(&self) -> Result<MemoryPeer, TransportError> {
        self.connect_with_headers(Vec::new())
    }

    /// Open a new connection presenting the given handshake headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has been dropped.
    pub fn connect_with_headers(
        &self,
        headers: Vec<(String, String)>,
    ) -> Result<MemoryPeer, TransportError> {
        let (socket, inbound, peer) = socket_pair();
        self.tx
            .send(Accepted {
                socket,
                inbound: Box::new(inbound),
                headers,
            })
            .map_err(|_| TransportError::Other("Memory transport dropped".into()))?;
        Ok(peer)
    }
}

/// Create an in-memory transport and its connector.
#[must_use]
pub fn memory_transport() -> (MemoryTransport, MemoryConnector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            incoming: tokio::sync::Mutex::new(rx),
        },
        MemoryConnector { tx },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
