//! Binding registry.
//!
//! One callback token per (channel, event) pair. The key is a real pair,
//! so `("ab", "c")` and `("a", "bc")` never collide.

use pusher_bridge_transport::CallbackId;
use std::collections::HashMap;
use std::fmt;

/// Composite key of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    /// Channel name.
    pub channel_name: String,
    /// Event name.
    pub event_name: String,
}

impl BindingKey {
    /// Create a key.
    #[must_use]
    pub fn new(channel_name: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            event_name: event_name.into(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_name, self.event_name)
    }
}

/// Active bindings.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: HashMap<BindingKey, CallbackId>,
}

impl BindingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token bound to a pair.
    #[must_use]
    pub fn get(&self, channel_name: &str, event_name: &str) -> Option<&CallbackId> {
        self.bindings.get(&BindingKey::new(channel_name, event_name))
    }

    /// Record a token, returning the one it displaces.
    pub fn insert(&mut self, key: BindingKey, callback_id: CallbackId) -> Option<CallbackId> {
        self.bindings.insert(key, callback_id)
    }

    /// Remove the token bound to a pair.
    pub fn remove(&mut self, channel_name: &str, event_name: &str) -> Option<CallbackId> {
        self.bindings
            .remove(&BindingKey::new(channel_name, event_name))
    }

    /// Remove every binding on a channel, returning `(event, token)` pairs.
    pub fn remove_channel(&mut self, channel_name: &str) -> Vec<(String, CallbackId)> {
        let keys: Vec<BindingKey> = self
            .bindings
            .keys()
            .filter(|key| key.channel_name == channel_name)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let id = self.bindings.remove(&key)?;
                Some((key.event_name, id))
            })
            .collect()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Remove every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}
