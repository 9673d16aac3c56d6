//! Pairlink Relay Server -- rendezvous relay for two-party p2p signaling.
//!
//! An axum WebSocket server that pairs two connections by channel identifier
//! and forwards signaling payloads between them. The relay never sees
//! plaintext negotiation data -- every payload is an opaque blob.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:4000
//! cargo run --bin pairlink-relay
//!
//! # Run on custom address
//! cargo run --bin pairlink-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! RELAY_ADDR=127.0.0.1:8080 cargo run --bin pairlink-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use pairlink_relay::config::{RelayCliArgs, RelayConfig};
use pairlink_relay::relay::{self, RelayState};
use pairlink_relay::sweep;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting pairlink relay server");

    let state = Arc::new(RelayState::new());
    sweep::spawn_sweeper(
        Arc::clone(&state),
        config.sweep_interval(),
        config.max_connection_age(),
    );

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
