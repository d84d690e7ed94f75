//! `PeerChat` hub -- topic fan-out server.
//!
//! An axum WebSocket server that relays published payloads to every
//! subscriber of a topic. Payloads are opaque to the hub.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin peerchat-hub
//!
//! # Run on custom address
//! cargo run --bin peerchat-hub -- --bind 127.0.0.1:8080
//! ```

use std::sync::Arc;

use clap::Parser;
use peerchat_hub::config::{HubCliArgs, HubConfig};
use peerchat_hub::hub;

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let config = match HubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting peerchat hub");

    let state = Arc::new(config.hub_state());

    match hub::start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "hub server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    }
}
