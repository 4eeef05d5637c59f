//! Client options.
//!
//! Validated form of the `init` options. Built once per `init` and never
//! mutated afterwards.

use bridge_protocol::InitOptions;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{AuthBuildError, AuthRequestBuilder, Authorizer};

/// Host used when neither a host nor a cluster is configured.
pub const DEFAULT_HOST: &str = "ws.pusherapp.com";

/// Default activity timeout in milliseconds.
pub const DEFAULT_ACTIVITY_TIMEOUT_MS: u64 = 30_000;

/// Port used with TLS when none is configured.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Port used without TLS when none is configured.
pub const DEFAULT_PLAIN_PORT: u16 = 80;

/// Protocol revision advertised in connection URLs.
pub const PROTOCOL_REVISION: u8 = 7;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The init payload could not be parsed.
    #[error("Malformed init payload: {0}")]
    Malformed(String),

    /// The application key is empty.
    #[error("Application key cannot be empty")]
    EmptyAppKey,

    /// An explicit host is empty.
    #[error("Host cannot be empty")]
    EmptyHost,

    /// An explicit cluster is empty.
    #[error("Cluster cannot be empty")]
    EmptyCluster,

    /// Port 0 was requested.
    #[error("Port cannot be 0")]
    InvalidPort,

    /// Activity timeout of 0 was requested.
    #[error("Activity timeout cannot be 0")]
    InvalidActivityTimeout,

    /// Auth settings are malformed.
    #[error("Invalid auth configuration: {0}")]
    Auth(#[from] AuthBuildError),
}

/// Where the service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceHost {
    /// An explicit host name.
    Host(String),
    /// A hosted cluster.
    Cluster(String),
}

impl ServiceHost {
    /// Host name to connect to.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            ServiceHost::Host(host) => host.clone(),
            ServiceHost::Cluster(cluster) => format!("ws-{cluster}.pusher.com"),
        }
    }
}

/// Validated transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Channel authorization method.
    pub authorizer: Authorizer,
    /// Service host.
    pub host: ServiceHost,
    /// Service port.
    pub port: u16,
    /// Whether to use TLS.
    pub use_tls: bool,
    /// Inactivity period before the client pings the service.
    pub activity_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            authorizer: Authorizer::NoMethod,
            host: ServiceHost::Host(DEFAULT_HOST.to_string()),
            port: DEFAULT_TLS_PORT,
            use_tls: true,
            activity_timeout: Duration::from_millis(DEFAULT_ACTIVITY_TIMEOUT_MS),
        }
    }
}

impl ClientOptions {
    /// Validate `init` options.
    ///
    /// # Errors
    ///
    /// Returns an error if a host, cluster, port, timeout or auth setting
    /// is malformed.
    pub fn from_init(options: &InitOptions) -> Result<Self, ConfigError> {
        let host = match (&options.host, &options.cluster) {
            (Some(host), _) if host.trim().is_empty() => return Err(ConfigError::EmptyHost),
            (Some(host), _) => ServiceHost::Host(host.clone()),
            (None, Some(cluster)) if cluster.trim().is_empty() => {
                return Err(ConfigError::EmptyCluster)
            }
            (None, Some(cluster)) => ServiceHost::Cluster(cluster.clone()),
            (None, None) => ServiceHost::Host(DEFAULT_HOST.to_string()),
        };

        let use_tls = options.encrypted.unwrap_or(true);

        let port = match options.port {
            Some(0) => return Err(ConfigError::InvalidPort),
            Some(port) => port,
            None if use_tls => DEFAULT_TLS_PORT,
            None => DEFAULT_PLAIN_PORT,
        };

        let activity_timeout = match options.activity_timeout {
            Some(0) => return Err(ConfigError::InvalidActivityTimeout),
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_millis(DEFAULT_ACTIVITY_TIMEOUT_MS),
        };

        let authorizer = match &options.auth {
            Some(auth) => Authorizer::Endpoint(AuthRequestBuilder::new(
                &auth.endpoint,
                auth.headers.clone(),
            )?),
            None => Authorizer::NoMethod,
        };

        Ok(Self {
            authorizer,
            host,
            port,
            use_tls,
            activity_timeout,
        })
    }

    /// Connection URL for an application key.
    #[must_use]
    pub fn url(&self, app_key: &str) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/app/{app_key}?protocol={PROTOCOL_REVISION}",
            self.host.address(),
            self.port
        )
    }
}

/// Check that an application key is usable.
///
/// # Errors
///
/// Returns an error if the key is empty.
pub fn validate_app_key(app_key: &str) -> Result<(), ConfigError> {
    if app_key.trim().is_empty() {
        return Err(ConfigError::EmptyAppKey);
    }
    Ok(())
}
