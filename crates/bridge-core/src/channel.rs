//! Channel registry.
//!
//! Maps channel names to the handles returned by the transport. The kind of
//! subscription a channel needs is derived from its name.

use pusher_bridge_transport::ChannelHandle;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Prefix token of private channels.
pub const PRIVATE_PREFIX: &str = "private";

/// Prefix token of presence channels.
pub const PRESENCE_PREFIX: &str = "presence";

/// Subscription kind of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// Anyone may subscribe.
    Public,
    /// Subscription requires authorization.
    Private,
    /// Authorized, with member tracking.
    Presence,
}

impl ChannelType {
    /// Derive the channel type from the first `-`-delimited token of a name.
    #[must_use]
    pub fn from_name(channel_name: &str) -> Self {
        match channel_name.split('-').next() {
            Some(PRIVATE_PREFIX) => ChannelType::Private,
            Some(PRESENCE_PREFIX) => ChannelType::Presence,
            _ => ChannelType::Public,
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Public => "public",
            ChannelType::Private => "private",
            ChannelType::Presence => "presence",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscribed channels, at most one handle per name.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn ChannelHandle>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, returning the one it replaces.
    pub fn insert(
        &mut self,
        channel_name: impl Into<String>,
        handle: Arc<dyn ChannelHandle>,
    ) -> Option<Arc<dyn ChannelHandle>> {
        let channel_name = channel_name.into();
        trace!(channel = %channel_name, "Registering channel");
        self.channels.insert(channel_name, handle)
    }

    /// Look up a handle.
    #[must_use]
    pub fn get(&self, channel_name: &str) -> Option<&Arc<dyn ChannelHandle>> {
        self.channels.get(channel_name)
    }

    /// Remove a handle.
    pub fn remove(&mut self, channel_name: &str) -> Option<Arc<dyn ChannelHandle>> {
        self.channels.remove(channel_name)
    }

    /// Registered channel names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Remove and return every handle.
    pub fn drain(&mut self) -> Vec<(String, Arc<dyn ChannelHandle>)> {
        self.channels.drain().collect()
    }
}
