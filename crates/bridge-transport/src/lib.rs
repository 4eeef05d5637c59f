//! # pusher-bridge-transport
//!
//! Transport capability layer for the Pusher bridge.
//!
//! - **traits** - what the gateway needs from a pub/sub client
//! - **options** - validated client configuration
//! - **auth** - channel authorization request building
//! - **local** - an in-memory client for tests and local development
//!
//! ```rust,ignore
//! use pusher_bridge_transport::{ClientFactory, PusherClient};
//!
//! fn open(factory: &dyn ClientFactory, delegate: Arc<dyn ConnectionDelegate>) {
//!     let client = factory.create("app-key", ClientOptions::default(), delegate)?;
//!     client.connect();
//! }
//! ```

pub mod auth;
pub mod options;
pub mod traits;

#[cfg(feature = "local")]
pub mod local;

pub use auth::{AuthBody, AuthBuildError, AuthRequest, AuthRequestBuilder, Authorizer};
pub use options::{ClientOptions, ConfigError, ServiceHost};
pub use traits::{
    CallbackId, ChannelHandle, ClientFactory, ConnectionDelegate, EventCallback, PusherClient,
    TransportError, TransportEvent, TransportState,
};

#[cfg(feature = "local")]
pub use local::{LocalClient, LocalFactory};
