//! Connection state reporting.
//!
//! A stateless translator: every native transition from the transport is
//! mapped onto canonical states and sent through the bridge. Whether a
//! transition is legal is the transport's business.

use bridge_protocol::{ConnectionState, StreamMessage};
use pusher_bridge_transport::{ConnectionDelegate, TransportState};
use std::sync::Arc;
use tracing::debug;

use crate::bridge::MessageBridge;

/// Map a native transport state onto its canonical state.
#[must_use]
pub fn canonical_state(native: TransportState) -> ConnectionState {
    match native {
        TransportState::Connecting => ConnectionState::Connecting,
        TransportState::Connected => ConnectionState::Connected,
        TransportState::Disconnecting => ConnectionState::Disconnecting,
        TransportState::Initialized | TransportState::Disconnected | TransportState::Failed => {
            ConnectionState::Disconnected
        }
        TransportState::Reconnecting
        | TransportState::ReconnectingWhenNetworkBecomesReachable
        | TransportState::Unavailable => ConnectionState::Reconnecting,
    }
}

/// Build the stream message for a native transition.
#[must_use]
pub fn state_change(previous: TransportState, current: TransportState) -> StreamMessage {
    StreamMessage::state_change(canonical_state(previous), canonical_state(current))
}

/// Delegate registered with each transport client.
pub struct StateReporter {
    bridge: Arc<MessageBridge>,
    epoch: u64,
}

impl StateReporter {
    /// Create a reporter for the session started at `epoch`.
    #[must_use]
    pub fn new(bridge: Arc<MessageBridge>, epoch: u64) -> Self {
        Self { bridge, epoch }
    }
}

impl ConnectionDelegate for StateReporter {
    fn changed_connection_state(&self, previous: TransportState, current: TransportState) {
        if self.bridge.logging_enabled() {
            debug!(from = %previous, to = %current, epoch = self.epoch, "Connection state changed");
        }
        self.bridge
            .deliver_from(self.epoch, &state_change(previous, current));
    }
}
