//! ==============================================================================
//! main.rs - telemetry relay entry point
//! ==============================================================================
//!
//! purpose:
//!     relays one iot device's temperature/led telemetry from an mqtt broker
//!     to live dashboards in the browser.
//!
//! responsibilities:
//!     - load configuration (relay.toml + environment)
//!     - build the one reading store and the one telemetry bridge
//!     - drive the mqtt event loop in the background
//!     - serve the rest query surface and the /ws viewer socket
//!
//! relationships:
//!     - uses: config.rs, store.rs, bridge.rs, api.rs (router), gateway.rs (/ws)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     relay (this binary)                      │
//!     │  ┌─────────────┐                      ┌─────────────────┐   │
//!     │  │ mqtt loop   │ ──── append ───────> │  reading store  │   │
//!     │  │ (bridge)    │                      └────────┬────────┘   │
//!     │  └──────┬──────┘                               │ read       │
//!     │         │ push events             ┌────────────┴────────┐   │
//!     │         └───────────────────────> │ web server (axum)   │   │
//!     │                                   │  /api/*    /ws      │   │
//!     │                                   └─────────────────────┘   │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use telemetry_relay::bridge::mqtt_client;
use telemetry_relay::{config::RelayConfig, AppState, ReadingStore, TelemetryBridge};

/// Relay single-device MQTT telemetry to dashboard viewers.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Config file (default: config/relay.toml, then ../config/relay.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration
    let config = match &cli.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::load_or_default(),
    }
    .with_env_overrides();

    // step 2: logging; RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    config.log_summary();

    // step 3: the one store and the one bridge
    let store = Arc::new(ReadingStore::new());
    let bridge = Arc::new(TelemetryBridge::new(store.clone(), &config));

    // step 4: mqtt in the background
    let (client, eventloop) = mqtt_client(&config.mqtt);
    tokio::spawn(bridge.clone().run(client, eventloop, config.mqtt.clone()));

    // step 5: web server
    let app = telemetry_relay::router(AppState::new(store, bridge, &config.history));
    let listener = tokio::net::TcpListener::bind(config.server.bind.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!("dashboard api live at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
