//! Live connection registry.

use crate::connection::Connection;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use evsock_transport::ConnectionId;
use tracing::{debug, trace};

/// Every live connection, keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its current id.
    pub fn add(&self, connection: &Connection) {
        let id = connection.id();
        trace!(connection = %id, "Registering connection");
        self.connections.insert(id, connection.clone());
    }

    /// Unregister a connection.
    ///
    /// Returns `true` if it was registered.
    pub fn remove(&self, connection: &Connection) -> bool {
        let id = connection.id();
        let removed = self
            .connections
            .remove_if(&id, |_, registered| registered.same_as(connection))
            .is_some();
        if removed {
            debug!(connection = %id, "Unregistered connection");
        }
        removed
    }

    /// Move `connection` from `old` to `new`.
    ///
    /// Returns `false` without changing anything if `new` is held by another
    /// connection.
    pub fn rekey(&self, connection: &Connection, old: &ConnectionId, new: &ConnectionId) -> bool {
        if old == new {
            return true;
        }

        match self.connections.entry(new.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(connection.clone());
            }
        }
        self.connections
            .remove_if(old, |_, registered| registered.same_as(connection));

        debug!(old = %old, new = %new, "Re-keyed connection");
        true
    }

    /// Look up a connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the registered ids.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every registered connection.
    #[must_use]
    pub fn all(&self) -> Vec<Connection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
