//! Channel registry for evsock.
//!
//! Channels are named broadcast groups. A channel exists exactly while it has
//! at least one member: it is created on the first join and deleted when the
//! last member leaves.

use dashmap::DashMap;
use evsock_transport::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// Any non-empty string names a channel. The empty name means "no channel".
///
/// # Errors
///
/// Returns an error message if the channel name is empty.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    Ok(())
}

/// A named set of member connections.
#[derive(Debug, Clone)]
pub struct Channel {
    name: ChannelId,
    members: HashSet<ConnectionId>,
}

impl Channel {
    /// Create a new, empty channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    /// Check if the channel has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Membership of every live channel.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Channel>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `name`, creating the channel if needed.
    pub fn join(&self, id: &ConnectionId, name: &str) {
        let mut entry = self.channels.entry(name.to_string()).or_insert_with(|| {
            debug!(channel = %name, "Creating new channel");
            Channel::new(name)
        });
        entry.members.insert(id.clone());

        debug!(
            channel = %name,
            connection = %id,
            members = entry.member_count(),
            "Joined channel"
        );
    }

    /// Remove `id` from `name`, deleting the channel once it is empty.
    ///
    /// Returns `true` if `id` was a member.
    pub fn leave(&self, id: &ConnectionId, name: &str) -> bool {
        let removed = match self.channels.get_mut(name) {
            Some(mut entry) => entry.members.remove(id),
            None => return false,
        };

        if removed {
            debug!(channel = %name, connection = %id, "Left channel");
        }

        if self
            .channels
            .remove_if(name, |_, channel| channel.is_empty())
            .is_some()
        {
            debug!(channel = %name, "Deleted empty channel");
        }

        removed
    }

    /// Replace `old` with `new` in the membership of `name`.
    pub fn rekey(&self, old: &ConnectionId, new: &ConnectionId, name: &str) {
        if let Some(mut entry) = self.channels.get_mut(name) {
            if entry.members.remove(old) {
                entry.members.insert(new.clone());
            }
        }
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Get the member count for a channel.
    #[must_use]
    pub fn member_count(&self, name: &str) -> usize {
        self.channels
            .get(name)
            .map(|e| e.member_count())
            .unwrap_or(0)
    }

    /// Get the member ids of a channel.
    #[must_use]
    pub fn members(&self, name: &str) -> Vec<ConnectionId> {
        self.channels
            .get(name)
            .map(|e| e.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
