//! Outbound stream messages.
//!
//! The host receives one stream carrying two kinds of message. On the wire
//! both share a single envelope with exactly one branch populated:
//!
//! ```text
//! {"event": {"channel", "event", "data"}, "connectionStateChange": null}
//! {"event": null, "connectionStateChange": {"currentState", "previousState"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;

/// An event raised on a bound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Channel the event was reported on.
    pub channel: String,
    /// Event name.
    pub event: String,
    /// Raw event payload.
    pub data: String,
}

/// A transition between two canonical connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStateChange {
    /// State after the transition.
    pub current_state: ConnectionState,
    /// State before the transition.
    pub previous_state: ConnectionState,
}

/// Wire envelope for a [`StreamMessage`].
///
/// Both fields are always serialized; the unused one is `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Populated for channel events.
    pub event: Option<ChannelEvent>,
    /// Populated for connection state changes.
    pub connection_state_change: Option<ConnectionStateChange>,
}

/// A message delivered on the outbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Envelope", try_from = "Envelope")]
pub enum StreamMessage {
    /// A data event from a bound channel.
    Event(ChannelEvent),
    /// A connection state change.
    StateChange(ConnectionStateChange),
}

impl StreamMessage {
    /// Create a channel event message.
    #[must_use]
    pub fn event(
        channel: impl Into<String>,
        event: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        StreamMessage::Event(ChannelEvent {
            channel: channel.into(),
            event: event.into(),
            data: data.into(),
        })
    }

    /// Create a connection state change message.
    #[must_use]
    pub fn state_change(previous: ConnectionState, current: ConnectionState) -> Self {
        StreamMessage::StateChange(ConnectionStateChange {
            current_state: current,
            previous_state: previous,
        })
    }

    /// Short name of the message kind, for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Event(_) => "event",
            StreamMessage::StateChange(_) => "connection_state_change",
        }
    }
}

impl From<StreamMessage> for Envelope {
    fn from(message: StreamMessage) -> Envelope {
        match message {
            StreamMessage::Event(event) => Envelope {
                event: Some(event),
                connection_state_change: None,
            },
            StreamMessage::StateChange(change) => Envelope {
                event: None,
                connection_state_change: Some(change),
            },
        }
    }
}

impl TryFrom<Envelope> for StreamMessage {
    type Error = &'static str;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match (envelope.event, envelope.connection_state_change) {
            (Some(event), None) => Ok(StreamMessage::Event(event)),
            (None, Some(change)) => Ok(StreamMessage::StateChange(change)),
            (Some(_), Some(_)) => Err("Envelope carries both an event and a state change"),
            (None, None) => Err("Envelope carries neither an event nor a state change"),
        }
    }
}
