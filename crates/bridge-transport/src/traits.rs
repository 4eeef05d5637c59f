//! Transport capability traits for the Pusher bridge.
//!
//! The bridge never talks to the network itself. Everything it needs from
//! a pub/sub client is expressed here, so any client (a real socket client
//! or the in-memory [`local`](crate::local) one) can sit behind the gateway.
//!
//! Implementations may invoke callbacks from any thread. They must not
//! invoke event callbacks synchronously from within `subscribe*`, `bind`
//! or `unbind`.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::options::ClientOptions;

/// Opaque token identifying one bound callback on a channel.
pub type CallbackId = String;

/// Callback invoked for every matching event on a channel.
pub type EventCallback = Box<dyn Fn(TransportEvent) + Send + Sync>;

/// An event as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Channel the event arrived on, if the transport reports one.
    pub channel_name: Option<String>,
    /// Event name.
    pub event_name: String,
    /// Raw payload, if any.
    pub data: Option<String>,
}

impl TransportEvent {
    /// Create an event with channel and payload.
    #[must_use]
    pub fn new(
        channel_name: impl Into<String>,
        event_name: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            channel_name: Some(channel_name.into()),
            event_name: event_name.into(),
            data: Some(data.into()),
        }
    }
}

/// Native connection states of a transport client.
///
/// This is the transport's own vocabulary; the gateway maps it onto the
/// canonical states reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Client created, never connected.
    Initialized,
    /// Connecting.
    Connecting,
    /// Connected.
    Connected,
    /// Disconnecting.
    Disconnecting,
    /// Disconnected.
    Disconnected,
    /// Reconnecting after a drop.
    Reconnecting,
    /// Waiting for the network before reconnecting.
    ReconnectingWhenNetworkBecomesReachable,
    /// Service unreachable, retrying.
    Unavailable,
    /// The client gave up.
    Failed,
}

impl TransportState {
    /// Native label for this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportState::Initialized => "initialized",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnecting => "disconnecting",
            TransportState::Disconnected => "disconnected",
            TransportState::Reconnecting => "reconnecting",
            TransportState::ReconnectingWhenNetworkBecomesReachable => {
                "reconnectingWhenNetworkBecomesReachable"
            }
            TransportState::Unavailable => "unavailable",
            TransportState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The subscription request was rejected.
    #[error("Subscription failed for {channel}: {reason}")]
    SubscriptionFailed {
        /// Channel name.
        channel: String,
        /// Reason reported by the client.
        reason: String,
    },
}

/// A subscribed channel.
pub trait ChannelHandle: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Bind a callback to an event, returning its token.
    fn bind(&self, event_name: &str, callback: EventCallback) -> CallbackId;

    /// Unbind exactly the callback identified by `callback_id`.
    fn unbind(&self, event_name: &str, callback_id: &str);

    /// Unbind every callback on this channel.
    fn unbind_all(&self);
}

/// Receives native connection state transitions.
pub trait ConnectionDelegate: Send + Sync {
    /// Called on every native transition.
    fn changed_connection_state(&self, previous: TransportState, current: TransportState);
}

/// A pub/sub client.
///
/// All methods return once the request is issued; outcomes surface later
/// through the delegate and bound callbacks.
pub trait PusherClient: Send + Sync {
    /// Open the connection. Must be idempotent.
    fn connect(&self);

    /// Close the connection. Must be idempotent.
    fn disconnect(&self);

    /// Subscribe to a public channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the client rejects the subscription.
    fn subscribe(&self, channel_name: &str) -> Result<Arc<dyn ChannelHandle>, TransportError>;

    /// Subscribe to a private channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the client rejects the subscription.
    fn subscribe_private(
        &self,
        channel_name: &str,
    ) -> Result<Arc<dyn ChannelHandle>, TransportError>;

    /// Subscribe to a presence channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the client rejects the subscription.
    fn subscribe_presence(
        &self,
        channel_name: &str,
    ) -> Result<Arc<dyn ChannelHandle>, TransportError>;

    /// Unsubscribe from a channel.
    fn unsubscribe(&self, channel_name: &str);

    /// Remove every global callback.
    fn unbind_all(&self);

    /// Unsubscribe from every channel.
    fn unsubscribe_all(&self);

    /// Transport-assigned socket id, once connected.
    fn socket_id(&self) -> Option<String>;
}

/// Constructs pub/sub clients.
pub trait ClientFactory: Send + Sync {
    /// Create a client that reports state transitions to `delegate`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed.
    fn create(
        &self,
        app_key: &str,
        options: ClientOptions,
        delegate: Arc<dyn ConnectionDelegate>,
    ) -> Result<Arc<dyn PusherClient>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_event_new() {
        let event = TransportEvent::new("room1", "message", "hi");
        assert_eq!(event.channel_name.as_deref(), Some("room1"));
        assert_eq!(event.data.as_deref(), Some("hi"));
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(TransportState::Unavailable.to_string(), "unavailable");
        assert_eq!(
            TransportState::ReconnectingWhenNetworkBecomesReachable.to_string(),
            "reconnectingWhenNetworkBecomesReachable"
        );
    }
}
