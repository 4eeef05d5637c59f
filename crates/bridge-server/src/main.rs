//! # Pusher Bridge Server
//!
//! Drives a Pusher gateway from a host over WebSocket, backed by the
//! in-memory transport.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! pusher-bridge
//!
//! # Run with environment variables
//! PUSHER_BRIDGE_PORT=8080 PUSHER_BRIDGE_HOST=0.0.0.0 pusher-bridge
//! ```

mod config;
mod dispatch;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pusher_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        "Starting bridge server on {}:{} (error policy: {:?})",
        config.host,
        config.port,
        config.gateway.error_policy
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
