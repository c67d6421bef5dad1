//! Local event emitter.
//!
//! Every connection owns one emitter. Listeners are keyed by [`Event`], a
//! closed set of lifecycle events plus [`Event::Custom`] for application
//! event names, and always run with the owning connection as receiver.

use evsock_protocol::Payload;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A local event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// The client echoed `sync`.
    Open,
    /// The transport closed.
    Close,
    /// A transport, parse or pipeline error.
    Error,
    /// The connection joined a channel.
    ChannelJoin,
    /// The connection left a channel.
    ChannelLeave,
    /// The auth gate accepted the connection.
    Authenticated,
    /// The auth gate rejected the connection.
    Unauthorized,
    /// Application event.
    Custom(String),
}

impl Event {
    /// Create an application event.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    /// The event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Event::Open => "open",
            Event::Close => "close",
            Event::Error => "error",
            Event::ChannelJoin => "channeljoin",
            Event::ChannelLeave => "channelleave",
            Event::Authenticated => "authenticated",
            Event::Unauthorized => "unauthorized",
            Event::Custom(name) => name,
        }
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        match name {
            "open" => Event::Open,
            "close" => Event::Close,
            "error" => Event::Error,
            "channeljoin" => Event::ChannelJoin,
            "channelleave" => Event::ChannelLeave,
            "authenticated" => Event::Authenticated,
            "unauthorized" => Event::Unauthorized,
            other => Event::Custom(other.to_string()),
        }
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        match Event::from(name.as_str()) {
            Event::Custom(_) => Event::Custom(name),
            known => known,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A registered callback. Identity is the `Arc` allocation.
pub type Listener<T> = Arc<dyn Fn(&T, &Payload) + Send + Sync>;

struct Record<T> {
    id: u64,
    listener: Listener<T>,
    once: bool,
}

struct Table<T> {
    events: HashMap<Event, Vec<Record<T>>>,
    next_id: u64,
}

/// Ordered listener table.
pub struct Emitter<T> {
    table: Mutex<Table<T>>,
}

impl<T> Emitter<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                events: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Append a listener for `event`.
    pub fn add(&self, event: Event, listener: Listener<T>, once: bool) {
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        table
            .events
            .entry(event)
            .or_default()
            .push(Record { id, listener, once });
    }

    /// Remove every listener for every event.
    pub fn remove_all(&self) {
        self.table.lock().events.clear();
    }

    /// Remove every listener for `event`.
    pub fn remove_event(&self, event: &Event) {
        self.table.lock().events.remove(event);
    }

    /// Remove the first record for `event` holding `listener`.
    ///
    /// Returns `true` if a record was removed.
    pub fn remove_listener(&self, event: &Event, listener: &Listener<T>) -> bool {
        let mut table = self.table.lock();
        let Some(records) = table.events.get_mut(event) else {
            return false;
        };

        match records
            .iter()
            .position(|r| Arc::ptr_eq(&r.listener, listener))
        {
            Some(index) => {
                records.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &Event) -> usize {
        self.table.lock().events.get(event).map_or(0, Vec::len)
    }

    /// Listeners registered for `event`, in order.
    #[must_use]
    pub fn listeners(&self, event: &Event) -> Vec<Listener<T>> {
        self.table
            .lock()
            .events
            .get(event)
            .map(|records| records.iter().map(|r| r.listener.clone()).collect())
            .unwrap_or_default()
    }

    /// Invoke every listener registered for `event`.
    ///
    /// Listeners run outside the table lock, so they may register or remove
    /// listeners themselves. One-shot listeners invoked here are dropped
    /// afterwards. Returns the number of listeners invoked.
    pub fn emit(&self, receiver: &T, event: &Event, payload: &Payload) -> usize {
        let snapshot: Vec<(u64, Listener<T>, bool)> = self
            .table
            .lock()
            .events
            .get(event)
            .map(|records| {
                records
                    .iter()
                    .map(|r| (r.id, r.listener.clone(), r.once))
                    .collect()
            })
            .unwrap_or_default();

        let mut fired_once = Vec::new();
        for (id, listener, once) in &snapshot {
            listener(receiver, payload);
            if *once {
                fired_once.push(*id);
            }
        }

        if !fired_once.is_empty() {
            if let Some(records) = self.table.lock().events.get_mut(event) {
                records.retain(|r| !fired_once.contains(&r.id));
            }
        }

        snapshot.len()
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        f.debug_map()
            .entries(table.events.iter().map(|(event, records)| (event, records.len())))
            .finish()
    }
}
