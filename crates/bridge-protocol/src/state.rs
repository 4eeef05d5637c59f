//! Canonical connection states.
//!
//! These are the only state labels the host ever sees, whatever the
//! underlying transport calls its own states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical connection status reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Connecting,
    /// The connection is established.
    Connected,
    /// A disconnect was requested and is in progress.
    Disconnecting,
    /// No connection.
    Disconnected,
    /// The connection dropped and the transport is trying again.
    Reconnecting,
}

impl ConnectionState {
    /// All canonical states.
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Disconnecting,
        ConnectionState::Disconnected,
        ConnectionState::Reconnecting,
    ];

    /// Wire label for this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or("Invalid connection state")
    }
}
