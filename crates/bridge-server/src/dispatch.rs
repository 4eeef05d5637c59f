//! Host command dispatch.
//!
//! Turns a `(method, arguments)` pair from the host into a gateway call
//! and applies the configured error policy to the outcome.

use bridge_protocol::{Command, ProtocolError};
use pusher_bridge_core::{Gateway, GatewayError};
use pusher_bridge_transport::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics;

/// What the host sees when a command fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Failures are logged and the host gets an empty success.
    #[default]
    Silent,
    /// Failures are returned to the host.
    Report,
}

/// Routes host commands into a gateway.
#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<Gateway>,
    policy: ErrorPolicy,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, policy: ErrorPolicy) -> Self {
        Self { gateway, policy }
    }

    /// The gateway commands are routed into.
    #[must_use]
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Handle one host command.
    ///
    /// `Ok(Some(_))` carries a string result, `Ok(None)` an empty one.
    ///
    /// # Errors
    ///
    /// Unknown methods are always reported. Other failures are reported
    /// only under [`ErrorPolicy::Report`].
    pub fn handle(
        &self,
        method: &str,
        arguments: Option<&str>,
    ) -> Result<Option<String>, GatewayError> {
        metrics::record_command(method);

        match self.execute(method, arguments) {
            Ok(result) => Ok(result),
            Err(e) => {
                metrics::record_command_error(method);
                if let GatewayError::Protocol(ProtocolError::UnknownMethod(_)) = e {
                    return Err(e);
                }
                if self.gateway.bridge().logging_enabled() {
                    warn!(method, error = %e, "Command failed");
                }
                match self.policy {
                    ErrorPolicy::Silent => Ok(None),
                    ErrorPolicy::Report => Err(e),
                }
            }
        }
    }

    fn execute(
        &self,
        method: &str,
        arguments: Option<&str>,
    ) -> Result<Option<String>, GatewayError> {
        let command = match Command::parse(method, arguments) {
            Ok(command) => command,
            // A broken init still tears down the previous session.
            Err(e) if method == "init" => {
                self.gateway.reset();
                return Err(ConfigError::Malformed(e.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };

        if self.gateway.bridge().logging_enabled() {
            debug!(method = command.method(), "Dispatching command");
        }

        match command {
            Command::Init(args) => self.gateway.initialize(args)?,
            Command::Connect => self.gateway.connect(),
            Command::Disconnect => self.gateway.disconnect(),
            Command::Subscribe(channel) => self.gateway.subscribe(&channel)?,
            Command::Unsubscribe(channel) => self.gateway.unsubscribe(&channel),
            Command::Bind(args) => self.gateway.bind(&args.channel_name, &args.event_name),
            Command::Unbind(args) => self.gateway.unbind(&args.channel_name, &args.event_name),
            Command::GetSocketId => return Ok(self.gateway.socket_id()),
        }

        Ok(None)
    }
}
