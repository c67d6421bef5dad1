//! Connection state and event handling.
//!
//! A [`Connection`] wraps one transport socket. It owns the local listener
//! table, the current channel and the handshake progress, and it is the unit
//! the registries and the middleware pipeline operate on.
//!
//! ```text
//! Connecting ──sync echo──▶ Open ──transport close──▶ Closed
//! ```
//!
//! Nothing waits on the handshake: application events flow in every state
//! until the transport closes.

use crate::auth::Handshake;
use crate::channel::validate_channel_name;
use crate::emitter::{Emitter, Event, Listener};
use crate::error::EvsockError;
use crate::hub::Hub;
use evsock_protocol::{
    codec, is_reserved, BroadcastRequest, ControlEvent, Envelope, ErrorData, Frame, Payload,
    SyncData, ERROR_EVENT,
};
use evsock_transport::{CloseInfo, ConnectionId, ReadyState, Socket, TransportError};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted; `sync` sent but not yet echoed.
    Connecting,
    /// The client echoed `sync`.
    Open,
    /// The transport closed.
    Closed,
}

struct Shared {
    id: RwLock<ConnectionId>,
    socket: Arc<dyn Socket>,
    hub: Arc<Hub>,
    channel: RwLock<String>,
    state: Mutex<ConnectionState>,
    handshake: Mutex<Handshake>,
    emitter: Emitter<Connection>,
}

/// A live event socket. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

fn error_payload(message: &str) -> Payload {
    Payload::Json(json!({ "message": message }))
}

fn json_payload<T: DeserializeOwned>(event: ControlEvent, data: Payload) -> Result<T, EvsockError> {
    match data {
        Payload::Json(value) => {
            serde_json::from_value(value).map_err(|e| EvsockError::ControlPayload {
                event,
                reason: e.to_string(),
            })
        }
        Payload::Binary(_) => Err(EvsockError::ControlPayload {
            event,
            reason: "expected a JSON payload".into(),
        }),
    }
}

impl Connection {
    /// Wrap a freshly accepted socket.
    ///
    /// Assigns an id, registers the connection with `hub` and sends the
    /// `sync` control envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the `sync` envelope cannot be sent; the connection
    /// is unregistered again in that case.
    pub fn accept(hub: Arc<Hub>, socket: Arc<dyn Socket>) -> Result<Self, EvsockError> {
        let id = ConnectionId::generate();
        let sync = SyncData {
            id: id.to_string(),
            has_auth: hub.has_auth(),
        };

        let connection = Self {
            shared: Arc::new(Shared {
                id: RwLock::new(id.clone()),
                socket,
                hub,
                channel: RwLock::new(String::new()),
                state: Mutex::new(ConnectionState::Connecting),
                handshake: Mutex::new(Handshake::Pending),
                emitter: Emitter::new(),
            }),
        };

        connection.hub().connections().add(&connection);

        if let Err(e) = connection.send(ControlEvent::Sync.wire_name(), &sync) {
            connection.hub().connections().remove(&connection);
            return Err(e);
        }

        debug!(connection = %id, remote = ?connection.remote_addr(), "Connection accepted");
        Ok(connection)
    }

    /// Current identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id.read().clone()
    }

    /// Current channel name, empty when not in a channel.
    #[must_use]
    pub fn channel(&self) -> String {
        self.shared.channel.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    #[must_use]
    pub fn handshake(&self) -> Handshake {
        *self.shared.handshake.lock()
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.shared.hub
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.shared.socket.ready_state()
    }

    /// Whether the socket accepts writes.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.socket.is_open()
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<String> {
        self.shared.socket.remote_addr()
    }

    /// Whether `other` is a handle to this same connection.
    #[must_use]
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // Local events

    /// Register a listener for `event`. Returns the listener for later removal.
    pub fn on<F>(&self, event: impl Into<Event>, listener: F) -> Listener<Connection>
    where
        F: Fn(&Connection, &Payload) + Send + Sync + 'static,
    {
        let listener: Listener<Connection> = Arc::new(listener);
        self.on_listener(event, listener.clone());
        listener
    }

    /// Register a listener that runs at most once.
    pub fn once<F>(&self, event: impl Into<Event>, listener: F) -> Listener<Connection>
    where
        F: Fn(&Connection, &Payload) + Send + Sync + 'static,
    {
        let listener: Listener<Connection> = Arc::new(listener);
        self.once_listener(event, listener.clone());
        listener
    }

    /// Register an existing listener. Registering it twice adds two records.
    pub fn on_listener(&self, event: impl Into<Event>, listener: Listener<Connection>) -> &Self {
        self.shared.emitter.add(event.into(), listener, false);
        self
    }

    /// Register an existing listener as one-shot.
    pub fn once_listener(&self, event: impl Into<Event>, listener: Listener<Connection>) -> &Self {
        self.shared.emitter.add(event.into(), listener, true);
        self
    }

    /// Remove every listener.
    pub fn off_all(&self) -> &Self {
        self.shared.emitter.remove_all();
        self
    }

    /// Remove every listener for `event`.
    pub fn off(&self, event: impl Into<Event>) -> &Self {
        self.shared.emitter.remove_event(&event.into());
        self
    }

    /// Remove the first registration of `listener` for `event`.
    pub fn off_listener(&self, event: impl Into<Event>, listener: &Listener<Connection>) -> bool {
        self.shared.emitter.remove_listener(&event.into(), listener)
    }

    #[must_use]
    pub fn listener_count(&self, event: impl Into<Event>) -> usize {
        self.shared.emitter.listener_count(&event.into())
    }

    /// Invoke local listeners. Returns how many ran.
    pub fn emit(&self, event: impl Into<Event>, payload: &Payload) -> usize {
        let event = event.into();
        let count = self.shared.emitter.emit(self, &event, payload);
        trace!(connection = %self.id(), event = %event, listeners = count, "Emitted");
        count
    }

    // Outbound

    /// Send a JSON text envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the socket is closed.
    pub fn send<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<(), EvsockError> {
        self.write(codec::encode_text(event, data)?)
    }

    /// Send raw bytes as a binary envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or the socket is closed.
    pub fn send_binary(&self, event: &str, data: &[u8]) -> Result<(), EvsockError> {
        self.write(codec::encode_binary(event, data)?)
    }

    /// Send a payload, choosing the frame kind from the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the socket is closed.
    pub fn send_payload(&self, event: &str, payload: &Payload) -> Result<(), EvsockError> {
        self.write(codec::encode_payload(event, payload)?)
    }

    fn write(&self, frame: Frame) -> Result<(), EvsockError> {
        self.shared.socket.send(frame).map_err(EvsockError::from)
    }

    /// Ask the transport to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the close request cannot be delivered.
    pub fn close(&self) -> Result<(), EvsockError> {
        debug!(connection = %self.id(), "Closing connection");
        self.shared.socket.close().map_err(EvsockError::from)
    }

    // Channels

    /// Join `name`, leaving the current channel first.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid (nothing changes) or the
    /// acknowledgment cannot be sent.
    pub fn join(&self, name: &str) -> Result<(), EvsockError> {
        validate_channel_name(name).map_err(EvsockError::InvalidChannel)?;

        if !self.channel().is_empty() {
            if let Err(e) = self.leave_current() {
                debug!(connection = %self.id(), error = %e, "Leave before join failed");
            }
        }

        let id = self.id();
        *self.shared.channel.write() = name.to_string();
        self.hub().channels().join(&id, name);

        self.emit(Event::ChannelJoin, &Payload::from(json!(name)));
        self.send(ControlEvent::ChannelJoin.wire_name(), name)
    }

    /// Leave the current channel.
    ///
    /// `requested` is accepted for protocol symmetry only: the current channel
    /// is always the one left.
    ///
    /// # Errors
    ///
    /// Returns an error if the acknowledgment cannot be sent. Membership is
    /// cleared regardless.
    pub fn leave(&self, requested: &str) -> Result<(), EvsockError> {
        if !requested.is_empty() && requested != *self.shared.channel.read() {
            debug!(
                connection = %self.id(),
                requested = %requested,
                "Leave targets the current channel, ignoring requested name"
            );
        }
        self.leave_current()
    }

    /// Leave the current channel.
    ///
    /// Emits and sends `channelleave` even when not in a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the acknowledgment cannot be sent.
    pub fn leave_current(&self) -> Result<(), EvsockError> {
        let current = self.channel();

        self.emit(Event::ChannelLeave, &Payload::from(json!(current)));
        let sent = self.send(ControlEvent::ChannelLeave.wire_name(), &current);

        if !current.is_empty() {
            self.hub().channels().leave(&self.id(), &current);
        }
        self.shared.channel.write().clear();

        sent
    }

    /// Deliver `event` to every member of the current channel, sender included.
    ///
    /// Returns the number of recipients the event was delivered to.
    pub fn broadcast(&self, event: &str, data: impl Into<Payload>) -> usize {
        self.broadcast_to(&self.channel(), event, data)
    }

    /// Deliver `event` to every member of `channel`. No-op for an empty name.
    pub fn broadcast_to(&self, channel: &str, event: &str, data: impl Into<Payload>) -> usize {
        if channel.is_empty() {
            return 0;
        }

        self.multicast(|c: &Connection| *c.shared.channel.read() == channel, event, data)
    }

    /// Deliver `event` to every open connection of the hub matching `filter`.
    ///
    /// Each recipient runs the pipeline on its own copy of the payload. A
    /// rejected payload turns into an `error` envelope for that recipient
    /// only. Returns the number of successful deliveries.
    pub fn multicast<F>(&self, filter: F, event: &str, data: impl Into<Payload>) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let data = data.into();
        let registry = self.hub().connections();
        let mut delivered = 0;
        let mut visited: Vec<Connection> = Vec::new();

        // Pipeline stages may close or register connections while we iterate.
        // A connection being re-keyed can briefly sit under two ids.
        for id in registry.ids() {
            let Some(target) = registry.get(&id) else {
                continue;
            };
            if visited.iter().any(|seen| seen.same_as(&target)) {
                continue;
            }
            visited.push(target.clone());
            if !filter(&target) || !target.is_open() {
                continue;
            }

            let result = match self.hub().pipeline().run(&target, data.clone()) {
                Ok(payload) => target.send_payload(event, &payload).map(|()| true),
                Err(failure) => target
                    .send(ERROR_EVENT, &ErrorData::new(failure.error.message()))
                    .map(|()| false),
            };

            match result {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    debug!(connection = %id, error = %e, "Multicast delivery failed");
                }
            }
        }

        trace!(connection = %self.id(), event = %event, recipients = delivered, "Multicast");
        delivered
    }

    // Inbound

    /// Process one inbound frame.
    ///
    /// Errors are reported on the local `error` event, never returned.
    pub fn handle_frame(&self, frame: Frame) {
        if let Err(e) = self.dispatch(frame) {
            self.report_error(&e);
        }
    }

    /// Report a transport failure on the local `error` event.
    pub fn handle_transport_error(&self, error: TransportError) {
        self.report_error(&EvsockError::from(error));
    }

    /// Tear down after the transport closed.
    ///
    /// Emits `close`, drops channel membership, unregisters the connection
    /// and clears the listener table. Later calls do nothing.
    pub fn handle_close(&self, info: &CloseInfo) {
        {
            let mut state = self.shared.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        let id = self.id();
        debug!(connection = %id, code = info.code, reason = %info.reason, "Connection closed");

        self.emit(
            Event::Close,
            &Payload::from(json!({ "code": info.code, "reason": info.reason })),
        );

        let channel = std::mem::take(&mut *self.shared.channel.write());
        if !channel.is_empty() {
            self.hub().channels().leave(&id, &channel);
        }
        self.hub().connections().remove(self);
        self.shared.emitter.remove_all();
    }

    /// Emit `error` for `error` and log it.
    pub fn report_error(&self, error: &EvsockError) {
        warn!(connection = %self.id(), error = %error, "Connection error");
        self.emit(Event::Error, &error_payload(&error.to_string()));
    }

    fn dispatch(&self, frame: Frame) -> Result<(), EvsockError> {
        let Envelope { event, data } = codec::decode(&frame)?;

        if let Some(control) = ControlEvent::from_wire(&event) {
            return self.handle_control(control, data);
        }
        if is_reserved(&event) {
            debug!(connection = %self.id(), event = %event, "Ignoring unknown control event");
            return Ok(());
        }

        match self.hub().pipeline().run(self, data) {
            Ok(payload) => {
                self.emit(Event::from(event), &payload);
            }
            Err(failure) => {
                debug!(connection = %self.id(), event = %event, error = %failure.error, "Inbound event rejected");
                self.emit(Event::Error, &error_payload(failure.error.message()));
            }
        }
        Ok(())
    }

    fn handle_control(&self, control: ControlEvent, data: Payload) -> Result<(), EvsockError> {
        trace!(connection = %self.id(), event = %control, "Control event");

        match control {
            ControlEvent::Sync => {
                let sync: SyncData = json_payload(control, data)?;
                if let Err(e) = self.adopt_id(ConnectionId::from(sync.id)) {
                    self.report_error(&e);
                }
                *self.shared.state.lock() = ConnectionState::Open;
                self.emit(Event::Open, &Payload::null());
            }
            ControlEvent::Authenticate => self.authenticate(&data),
            ControlEvent::JoinChannel => {
                let name: String = json_payload(control, data)?;
                self.join(&name)?;
            }
            ControlEvent::LeaveChannel => {
                let requested = data.as_str().unwrap_or_default().to_owned();
                self.leave(&requested)?;
            }
            ControlEvent::Broadcast => {
                let request: BroadcastRequest = json_payload(control, data)?;
                self.broadcast(&request.event, request.data);
            }
            ControlEvent::ChannelJoin
            | ControlEvent::ChannelLeave
            | ControlEvent::Authenticated
            | ControlEvent::Unauthorized => {
                debug!(connection = %self.id(), event = %control, "Ignoring acknowledgment from client");
            }
        }
        Ok(())
    }

    /// Take over the identifier echoed by the client.
    fn adopt_id(&self, new: ConnectionId) -> Result<(), EvsockError> {
        let old = self.id();
        if old == new {
            return Ok(());
        }

        if !self.hub().connections().rekey(self, &old, &new) {
            return Err(EvsockError::DuplicateId(new));
        }
        *self.shared.id.write() = new.clone();

        let channel = self.channel();
        if !channel.is_empty() {
            self.hub().channels().rekey(&old, &new, &channel);
        }

        debug!(old = %old, new = %new, "Adopted connection id");
        Ok(())
    }

    fn authenticate(&self, credentials: &Payload) {
        let Some(gate) = self.hub().authenticator().cloned() else {
            debug!(connection = %self.id(), "No auth gate configured, ignoring authenticate");
            return;
        };

        {
            let mut handshake = self.shared.handshake.lock();
            if *handshake != Handshake::Pending {
                debug!(connection = %self.id(), handshake = ?*handshake, "Ignoring repeated authenticate");
                return;
            }
            *handshake = Handshake::Verifying;
        }

        match gate.authenticate(self, credentials) {
            Ok(()) => {
                *self.shared.handshake.lock() = Handshake::Authenticated;
                info!(connection = %self.id(), "Authenticated");

                self.emit(Event::Authenticated, &Payload::null());
                if let Err(e) = self.send(ControlEvent::Authenticated.wire_name(), &Value::Null) {
                    debug!(connection = %self.id(), error = %e, "Failed to acknowledge authentication");
                }
            }
            Err(rejection) => {
                *self.shared.handshake.lock() = Handshake::Rejected;
                warn!(connection = %self.id(), reason = %rejection, "Authentication rejected");

                self.emit(Event::Unauthorized, &error_payload(rejection.message()));
                if let Err(e) = self.send(
                    ControlEvent::Unauthorized.wire_name(),
                    &ErrorData::new(rejection.message()),
                ) {
                    debug!(connection = %self.id(), error = %e, "Failed to send unauthorized");
                }
                if let Err(e) = self.close() {
                    debug!(connection = %self.id(), error = %e, "Failed to close rejected connection");
                }
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("channel", &self.channel())
            .field("state", &self.state())
            .field("handshake", &self.handshake())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, MiddlewareError};
    use crate::middleware::StageResult;
    use evsock_transport::memory::{self, MemoryPeer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connect(hub: &Arc<Hub>) -> (Connection, MemoryPeer) {
        let (socket, _inbound, mut peer) = memory::socket_pair();
        let conn = Connection::accept(hub.clone(), socket).unwrap();
        peer.drain();
        (conn, peer)
    }

    fn received(peer: &mut MemoryPeer) -> Vec<Envelope> {
        peer.drain()
            .iter()
            .map(|frame| codec::decode(frame).unwrap())
            .collect()
    }

    fn text(event: &str, data: Value) -> Frame {
        codec::encode_text(event, &data).unwrap()
    }

    fn record(conn: &Connection, event: impl Into<Event>) -> Arc<Mutex<Vec<Payload>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        conn.on(event, move |_, payload| sink.lock().push(payload.clone()));
        seen
    }

    #[test]
    fn test_accept_sends_sync_and_registers() {
        let hub = Hub::builder().build();
        let (socket, _inbound, mut peer) = memory::socket_pair();
        let conn = Connection::accept(hub.clone(), socket).unwrap();

        let sync = received(&mut peer);
        assert_eq!(sync.len(), 1);
        assert_eq!(sync[0].control(), Some(ControlEvent::Sync));
        assert_eq!(
            sync[0].data,
            Payload::from(json!({"id": conn.id().to_string(), "hasAuth": false}))
        );

        assert!(hub.connections().contains(&conn.id()));
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_accept_reports_auth_gate() {
        let hub = Hub::builder()
            .auth(|_: &Connection, _: &Payload| -> Result<(), AuthError> { Ok(()) })
            .build();
        let (socket, _inbound, mut peer) = memory::socket_pair();
        let _conn = Connection::accept(hub, socket).unwrap();

        let sync = received(&mut peer);
        assert_eq!(sync[0].data.as_json().unwrap()["hasAuth"], json!(true));
    }

    #[test]
    fn test_accept_on_closed_socket_fails() {
        let hub = Hub::builder().build();
        let (socket, _inbound, _peer) = memory::socket_pair();
        socket.close().unwrap();

        assert!(Connection::accept(hub.clone(), socket).is_err());
        assert!(hub.connections().is_empty());
    }

    #[test]
    fn test_sync_echo_opens_and_adopts_id() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);
        let opened = record(&conn, Event::Open);
        conn.join("room").unwrap();
        let old = conn.id();

        conn.handle_frame(text(
            ControlEvent::Sync.wire_name(),
            json!({"id": "client-chosen"}),
        ));

        assert_eq!(opened.lock().len(), 1);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.id(), ConnectionId::from("client-chosen"));
        assert!(!hub.connections().contains(&old));
        assert!(hub.connections().get(&conn.id()).unwrap().same_as(&conn));
        assert_eq!(hub.channels().members("room"), vec![conn.id()]);
    }

    #[test]
    fn test_sync_echo_with_taken_id_keeps_old_id() {
        let hub = Hub::builder().build();
        let (first, _p1) = connect(&hub);
        let (second, _p2) = connect(&hub);
        let errors = record(&second, Event::Error);
        let opened = record(&second, Event::Open);
        let before = second.id();

        second.handle_frame(text(
            ControlEvent::Sync.wire_name(),
            json!({"id": first.id().to_string()}),
        ));

        assert_eq!(second.id(), before);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(opened.lock().len(), 1);
        assert_eq!(hub.connections().len(), 2);
    }

    #[test]
    fn test_on_and_once_through_connection() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        conn.on("tick", move |receiver, _| {
            assert!(receiver.hub().connections().contains(&receiver.id()));
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = calls.clone();
        conn.once("tick", move |_, _| {
            c.fetch_add(10, Ordering::SeqCst);
        });

        conn.emit("tick", &Payload::null());
        conn.emit("tick", &Payload::null());

        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert_eq!(conn.listener_count("tick"), 1);

        conn.off("tick");
        assert_eq!(conn.emit("tick", &Payload::null()), 0);
    }

    #[test]
    fn test_off_listener_removes_one_registration() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);

        let listener = conn.on("dup", |_, _| {});
        conn.on_listener("dup", listener.clone());
        assert_eq!(conn.listener_count("dup"), 2);

        assert!(conn.off_listener("dup", &listener));
        assert_eq!(conn.listener_count("dup"), 1);

        conn.off_all();
        assert_eq!(conn.listener_count("dup"), 0);
    }

    #[test]
    fn test_join_and_leave() {
        let hub = Hub::builder().build();
        let (conn, mut peer) = connect(&hub);
        let joins = record(&conn, Event::ChannelJoin);
        let leaves = record(&conn, Event::ChannelLeave);

        conn.join("room1").unwrap();
        assert_eq!(conn.channel(), "room1");
        assert_eq!(hub.channel_names(), vec!["room1".to_string()]);
        assert_eq!(*joins.lock(), vec![Payload::from(json!("room1"))]);

        let acks = received(&mut peer);
        assert_eq!(acks[0].control(), Some(ControlEvent::ChannelJoin));
        assert_eq!(acks[0].data, Payload::from(json!("room1")));

        conn.leave("room1").unwrap();
        assert_eq!(conn.channel(), "");
        assert!(hub.channel_names().is_empty());
        assert_eq!(*leaves.lock(), vec![Payload::from(json!("room1"))]);

        let acks = received(&mut peer);
        assert_eq!(acks[0].control(), Some(ControlEvent::ChannelLeave));
    }

    #[test]
    fn test_channel_listed_while_members_remain() {
        let hub = Hub::builder().build();
        let (a, _pa) = connect(&hub);
        let (b, _pb) = connect(&hub);

        a.join("room").unwrap();
        b.join("room").unwrap();
        a.leave("").unwrap();
        assert_eq!(hub.channel_names(), vec!["room".to_string()]);

        b.leave("").unwrap();
        assert!(hub.channel_names().is_empty());
    }

    #[test]
    fn test_join_switches_channel() {
        let hub = Hub::builder().build();
        let (conn, mut peer) = connect(&hub);

        conn.join("first").unwrap();
        conn.join("second").unwrap();

        assert_eq!(hub.channel_names(), vec!["second".to_string()]);
        let events: Vec<_> = received(&mut peer)
            .into_iter()
            .map(|e| (e.control(), e.data))
            .collect();
        assert_eq!(
            events,
            vec![
                (Some(ControlEvent::ChannelJoin), Payload::from(json!("first"))),
                (Some(ControlEvent::ChannelLeave), Payload::from(json!("first"))),
                (Some(ControlEvent::ChannelJoin), Payload::from(json!("second"))),
            ]
        );
    }

    #[test]
    fn test_leave_ignores_requested_name() {
        let hub = Hub::builder().build();
        let (conn, mut peer) = connect(&hub);
        conn.join("actual").unwrap();
        peer.drain();

        conn.handle_frame(text(ControlEvent::LeaveChannel.wire_name(), json!("other")));

        assert_eq!(conn.channel(), "");
        assert!(!hub.channels().contains("actual"));
        let acks = received(&mut peer);
        assert_eq!(acks[0].data, Payload::from(json!("actual")));
    }

    #[test]
    fn test_leave_without_channel_still_notifies() {
        let hub = Hub::builder().build();
        let (conn, mut peer) = connect(&hub);
        let leaves = record(&conn, Event::ChannelLeave);

        conn.leave("").unwrap();

        assert_eq!(*leaves.lock(), vec![Payload::from(json!(""))]);
        assert_eq!(received(&mut peer)[0].data, Payload::from(json!("")));
    }

    #[test]
    fn test_join_rejects_invalid_name() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);
        conn.join("keep").unwrap();

        assert!(matches!(conn.join(""), Err(EvsockError::InvalidChannel(_))));
        assert_eq!(conn.channel(), "keep");

        let errors = record(&conn, Event::Error);
        conn.handle_frame(text(ControlEvent::JoinChannel.wire_name(), json!(42)));
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(conn.channel(), "keep");
    }

    #[test]
    fn test_join_accepts_any_non_empty_name() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);

        conn.join("café").unwrap();
        assert_eq!(conn.channel(), "café");
        assert_eq!(hub.channel_names(), vec!["café".to_string()]);

        let long_name = "x".repeat(300);
        conn.join(&long_name).unwrap();
        assert_eq!(conn.channel(), long_name);
        assert_eq!(hub.channel_names(), vec![long_name]);
    }

    #[test]
    fn test_broadcast_reaches_channel_members_only() {
        let hub = Hub::builder().build();
        let (a, mut pa) = connect(&hub);
        let (b, mut pb) = connect(&hub);
        let (_c, mut pc) = connect(&hub);

        a.join("room1").unwrap();
        b.join("room1").unwrap();
        for peer in [&mut pa, &mut pb, &mut pc] {
            peer.drain();
        }

        assert_eq!(a.broadcast("msg", json!({"x": 1})), 2);

        for peer in [&mut pa, &mut pb] {
            let got = received(peer);
            assert_eq!(got, vec![Envelope::new("msg", json!({"x": 1}))]);
        }
        assert!(pc.drain().is_empty());
    }

    #[test]
    fn test_broadcast_control_event() {
        let hub = Hub::builder().build();
        let (a, mut pa) = connect(&hub);
        let (b, mut pb) = connect(&hub);
        a.join("room").unwrap();
        b.join("room").unwrap();
        pa.drain();
        pb.drain();

        a.handle_frame(text(
            ControlEvent::Broadcast.wire_name(),
            json!({"evName": "news", "data": [1, 2]}),
        ));

        assert_eq!(received(&mut pb), vec![Envelope::new("news", json!([1, 2]))]);
        assert_eq!(received(&mut pa), vec![Envelope::new("news", json!([1, 2]))]);
    }

    #[test]
    fn test_broadcast_without_channel_is_noop() {
        let hub = Hub::builder().build();
        let (a, mut pa) = connect(&hub);

        assert_eq!(a.broadcast("msg", json!(1)), 0);
        assert_eq!(a.broadcast_to("", "msg", json!(1)), 0);
        assert!(pa.drain().is_empty());
    }

    #[test]
    fn test_multicast_skips_sockets_not_open() {
        let hub = Hub::builder().build();
        let (a, mut pa) = connect(&hub);
        let (_b, mut pb) = connect(&hub);
        let (_c, mut pc) = connect(&hub);
        pb.set_ready_state(ReadyState::Closing);
        pc.set_ready_state(ReadyState::Connecting);

        assert_eq!(a.multicast(|_| true, "hello", json!(null)), 1);

        assert_eq!(received(&mut pa).len(), 1);
        assert!(pb.drain().is_empty());
        assert!(pc.drain().is_empty());
    }

    #[test]
    fn test_multicast_delivers_once_per_connection() {
        let hub = Hub::builder().build();
        let (a, mut pa) = connect(&hub);
        let (b, mut pb) = connect(&hub);

        // Leave `b` registered under a second id, as mid-way through a re-key.
        assert!(hub.connections().rekey(
            &b,
            &ConnectionId::from("already-gone"),
            &ConnectionId::from("alias")
        ));
        assert_eq!(hub.connections().len(), 3);

        assert_eq!(a.multicast(|_| true, "news", json!(1)), 2);

        assert_eq!(received(&mut pa), vec![Envelope::new("news", json!(1))]);
        assert_eq!(received(&mut pb), vec![Envelope::new("news", json!(1))]);
    }

    #[test]
    fn test_multicast_runs_pipeline_per_recipient() {
        let hub = Hub::builder()
            .middleware(|conn: &Connection, payload: &mut Payload| -> StageResult {
                if conn.channel() == "blocked" {
                    return Err(MiddlewareError::new("recipient blocked"));
                }
                *payload = Payload::from(json!({"to": conn.channel()}));
                Ok(())
            })
            .error_middleware(
                |_: &MiddlewareError, _: &Connection, _: &mut Payload| -> StageResult { Ok(()) },
            )
            .build();
        let (a, mut pa) = connect(&hub);
        let (b, mut pb) = connect(&hub);
        a.join("open").unwrap();
        b.join("blocked").unwrap();
        pa.drain();
        pb.drain();

        let delivered = a.multicast(|_| true, "note", json!("hi"));

        assert_eq!(delivered, 1);
        assert_eq!(
            received(&mut pa),
            vec![Envelope::new("note", json!({"to": "open"}))]
        );
        assert_eq!(
            received(&mut pb),
            vec![Envelope::new(ERROR_EVENT, json!({"message": "recipient blocked"}))]
        );
    }

    #[test]
    fn test_inbound_event_runs_pipeline_then_emits() {
        let hub = Hub::builder()
            .middleware(|_: &Connection, payload: &mut Payload| -> StageResult {
                match payload.as_json() {
                    Some(Value::Number(_)) => Ok(()),
                    _ => Err(MiddlewareError::new("numbers only")),
                }
            })
            .error_middleware(
                |_: &MiddlewareError, _: &Connection, _: &mut Payload| -> StageResult { Ok(()) },
            )
            .build();
        let (conn, _peer) = connect(&hub);
        let chats = record(&conn, "chat");
        let errors = record(&conn, Event::Error);

        conn.handle_frame(text("chat", json!(5)));
        conn.handle_frame(text("chat", json!("five")));

        assert_eq!(*chats.lock(), vec![Payload::from(json!(5))]);
        assert_eq!(
            *errors.lock(),
            vec![Payload::from(json!({"message": "numbers only"}))]
        );
    }

    #[test]
    fn test_malformed_frame_reports_error() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);
        let errors = record(&conn, Event::Error);

        conn.handle_frame(Frame::text("{not json"));
        conn.handle_frame(Frame::binary(vec![1u8]));
        conn.handle_transport_error(TransportError::UnsupportedFrame("raw frame".into()));

        assert_eq!(errors.lock().len(), 3);
        assert!(hub.connections().contains(&conn.id()));
    }

    #[test]
    fn test_reserved_events_never_reach_listeners() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);
        let unknown = record(&conn, "__evsock__::mystery");
        let acks = record(&conn, "__evsock__::channeljoin");

        conn.handle_frame(text("__evsock__::mystery", json!(1)));
        conn.handle_frame(text(ControlEvent::ChannelJoin.wire_name(), json!("x")));

        assert!(unknown.lock().is_empty());
        assert!(acks.lock().is_empty());
    }

    #[test]
    fn test_binary_send_and_receive() {
        let hub = Hub::builder().build();
        let (conn, mut peer) = connect(&hub);
        let frames = record(&conn, "frame");

        conn.send_binary("frame", &[1, 2, 3]).unwrap();
        let sent = peer.drain();
        assert!(matches!(sent[0], Frame::Binary(_)));

        let envelope = codec::decode(&sent[0]).unwrap();
        assert_eq!(envelope.event, "frame");
        assert_eq!(envelope.data, Payload::from(vec![1u8, 2, 3]));

        conn.handle_frame(sent[0].clone());
        assert_eq!(*frames.lock(), vec![Payload::from(vec![1u8, 2, 3])]);
    }

    #[test]
    fn test_authentication_accepted() {
        let hub = Hub::builder()
            .auth(|_: &Connection, credentials: &Payload| -> Result<(), AuthError> {
                match credentials.as_str() {
                    Some("secret") => Ok(()),
                    _ => Err(AuthError::new("bad token")),
                }
            })
            .build();
        let (conn, mut peer) = connect(&hub);
        let authenticated = record(&conn, Event::Authenticated);

        conn.handle_frame(text(ControlEvent::Authenticate.wire_name(), json!("secret")));

        assert_eq!(conn.handshake(), Handshake::Authenticated);
        assert_eq!(authenticated.lock().len(), 1);
        assert_eq!(
            received(&mut peer)[0].control(),
            Some(ControlEvent::Authenticated)
        );
        assert!(conn.is_open());
    }

    #[test]
    fn test_authentication_rejected_closes() {
        let hub = Hub::builder()
            .auth(|_: &Connection, _: &Payload| -> Result<(), AuthError> {
                Err(AuthError::new("bad token"))
            })
            .build();
        let (conn, mut peer) = connect(&hub);
        let rejected = record(&conn, Event::Unauthorized);

        conn.handle_frame(text(ControlEvent::Authenticate.wire_name(), json!("nope")));

        assert_eq!(conn.handshake(), Handshake::Rejected);
        assert_eq!(
            *rejected.lock(),
            vec![Payload::from(json!({"message": "bad token"}))]
        );
        let sent = received(&mut peer);
        assert_eq!(sent[0].control(), Some(ControlEvent::Unauthorized));
        assert_eq!(sent[0].data, Payload::from(json!({"message": "bad token"})));
        assert!(peer.is_closed());
    }

    #[test]
    fn test_gate_consulted_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hub = Hub::builder()
            .auth(move |_: &Connection, _: &Payload| -> Result<(), AuthError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();
        let (conn, _peer) = connect(&hub);

        conn.handle_frame(text(ControlEvent::Authenticate.wire_name(), json!("a")));
        conn.handle_frame(text(ControlEvent::Authenticate.wire_name(), json!("b")));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_traffic_not_gated_before_authentication() {
        let hub = Hub::builder()
            .auth(|_: &Connection, _: &Payload| -> Result<(), AuthError> { Ok(()) })
            .build();
        let (conn, _peer) = connect(&hub);
        let chats = record(&conn, "chat");

        conn.handle_frame(text("chat", json!("early")));
        conn.join("room").unwrap();

        assert_eq!(conn.handshake(), Handshake::Pending);
        assert_eq!(chats.lock().len(), 1);
        assert_eq!(conn.channel(), "room");
    }

    #[test]
    fn test_authenticate_without_gate_is_ignored() {
        let hub = Hub::builder().build();
        let (conn, mut peer) = connect(&hub);

        conn.handle_frame(text(ControlEvent::Authenticate.wire_name(), json!("x")));

        assert_eq!(conn.handshake(), Handshake::Pending);
        assert!(peer.drain().is_empty());
    }

    #[test]
    fn test_close_cleans_up() {
        let hub = Hub::builder().build();
        let (conn, _peer) = connect(&hub);
        let (other, _po) = connect(&hub);
        conn.join("room").unwrap();
        other.join("room").unwrap();
        let closes = record(&conn, Event::Close);

        conn.handle_close(&CloseInfo::new(1000, "done"));
        conn.handle_close(&CloseInfo::new(1000, "again"));

        assert_eq!(
            *closes.lock(),
            vec![Payload::from(json!({"code": 1000, "reason": "done"}))]
        );
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.channel(), "");
        assert!(!hub.connections().contains(&conn.id()));
        assert_eq!(hub.channels().members("room"), vec![other.id()]);
        assert_eq!(conn.listener_count(Event::Close), 0);

        other.handle_close(&CloseInfo::default());
        assert!(hub.channel_names().is_empty());
        assert!(hub.connections().is_empty());
    }
}
