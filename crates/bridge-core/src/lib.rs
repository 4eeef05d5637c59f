//! # pusher-bridge-core
//!
//! In-process state of the Pusher bridge.
//!
//! - **Gateway** - owns the transport client and the command surface
//! - **Channel registry** - channel name to transport handle
//! - **Binding registry** - (channel, event) to callback token
//! - **State reporting** - native transport states to canonical changes
//! - **Message bridge** - the single outbound sink
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Host     │────▶│   Gateway   │────▶│  Transport  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                       │
//!        │            ┌─────────────┐            │
//!        └────────────│   Bridge    │◀───────────┘
//!                     └─────────────┘
//! ```

pub mod binding;
pub mod bridge;
pub mod channel;
pub mod gateway;
pub mod state;

pub use binding::{BindingKey, BindingRegistry};
pub use bridge::{channel_sink, BridgeStats, ChannelSink, EventSink, MessageBridge, SinkId};
pub use channel::{ChannelRegistry, ChannelType};
pub use gateway::{Gateway, GatewayError};
pub use state::{canonical_state, StateReporter};
