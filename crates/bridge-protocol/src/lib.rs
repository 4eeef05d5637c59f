//! # bridge-protocol
//!
//! Wire types for the Pusher bridge.
//!
//! This crate defines everything that crosses the host boundary:
//!
//! - **Commands** - `init`, `connect`, `disconnect`, `subscribe`,
//!   `unsubscribe`, `bind`, `unbind`, `getSocketId` and their payloads
//! - **Stream messages** - the single envelope carrying either a channel
//!   event or a connection state change
//! - **Connection state** - the canonical state labels reported to the host
//!
//! ## Example
//!
//! ```rust
//! use bridge_protocol::{codec, ConnectionState, StreamMessage};
//!
//! let message = StreamMessage::state_change(
//!     ConnectionState::Connecting,
//!     ConnectionState::Connected,
//! );
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod codec;
pub mod commands;
pub mod messages;
pub mod state;

pub use codec::{decode, encode, ProtocolError};
pub use commands::{AuthArgs, BindArgs, Command, InitArgs, InitOptions};
pub use messages::{ChannelEvent, ConnectionStateChange, Envelope, StreamMessage};
pub use state::ConnectionState;
