//! Host commands and their payloads.
//!
//! Commands arrive as a method name plus an optional string argument.
//! `init`, `bind` and `unbind` carry a JSON document in that string;
//! `subscribe` and `unsubscribe` carry the bare channel name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codec::ProtocolError;

/// Payload of the `init` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitArgs {
    /// Application key for the pub/sub service.
    pub app_key: String,
    /// Client options.
    #[serde(default)]
    pub options: InitOptions,
    /// Whether the gateway writes its log side channel.
    #[serde(default)]
    pub is_logging_enabled: bool,
}

/// Client options carried by `init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
    /// Service cluster, used when no explicit host is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Explicit service host. Wins over `cluster`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Service port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Whether to use TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    /// Channel authorization endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthArgs>,
    /// Activity timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_timeout: Option<u64>,
}

/// Channel authorization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthArgs {
    /// Authorization endpoint URL.
    pub endpoint: String,
    /// Headers attached to every authorization request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Payload of the `bind` and `unbind` commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindArgs {
    /// Channel name.
    pub channel_name: String,
    /// Event name.
    pub event_name: String,
}

impl BindArgs {
    /// Create bind arguments.
    #[must_use]
    pub fn new(channel_name: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            event_name: event_name.into(),
        }
    }
}

/// A parsed host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create (or replace) the transport client.
    Init(InitArgs),
    /// Open the connection.
    Connect,
    /// Close the connection.
    Disconnect,
    /// Subscribe to a channel.
    Subscribe(String),
    /// Unsubscribe from a channel.
    Unsubscribe(String),
    /// Bind an event listener.
    Bind(BindArgs),
    /// Remove an event listener.
    Unbind(BindArgs),
    /// Query the transport-assigned socket id.
    GetSocketId,
}

impl Command {
    /// Parse a command from its method name and raw argument.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown methods, missing arguments, or
    /// malformed JSON payloads.
    pub fn parse(method: &str, arguments: Option<&str>) -> Result<Self, ProtocolError> {
        let required =
            || arguments.ok_or_else(|| ProtocolError::MissingArguments(method.to_string()));

        match method {
            "init" => Ok(Command::Init(serde_json::from_str(required()?)?)),
            "connect" => Ok(Command::Connect),
            "disconnect" => Ok(Command::Disconnect),
            "subscribe" => Ok(Command::Subscribe(required()?.to_string())),
            "unsubscribe" => Ok(Command::Unsubscribe(required()?.to_string())),
            "bind" => Ok(Command::Bind(serde_json::from_str(required()?)?)),
            "unbind" => Ok(Command::Unbind(serde_json::from_str(required()?)?)),
            "getSocketId" => Ok(Command::GetSocketId),
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }

    /// Method name of this command.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Command::Init(_) => "init",
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::Subscribe(_) => "subscribe",
            Command::Unsubscribe(_) => "unsubscribe",
            Command::Bind(_) => "bind",
            Command::Unbind(_) => "unbind",
            Command::GetSocketId => "getSocketId",
        }
    }
}
