//! Mission Control
//!
//! Relays live state from an agent gateway to dashboard clients.
//!
//! Run with: cargo run -- --gateway-url http://127.0.0.1:18789
//!
//! # Configuration
//!
//! Settings come from a TOML file (`--config`, or the default search
//! path), then environment variables, then command-line flags. A `.env`
//! file in the working directory is loaded first. `RUST_LOG` overrides the
//! configured log level.

use clap::Parser;
use mission_control::api::{serve, shutdown_signal, AppState};
use mission_control::config::{generate_default_config, Config, LoggingConfig};
use mission_control::gateway::{GatewayLink, WsConnector};
use mission_control::websocket::{start_event_relay, start_status_ticker, ConnectionHub};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "mission-control")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live dashboard relay for an agent gateway")]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the HTTP and dashboard WebSocket server
    #[arg(short, long)]
    port: Option<u16>,

    /// Gateway URL (http, https, ws or wss)
    #[arg(long)]
    gateway_url: Option<String>,

    /// Print an annotated default config and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = cli.gateway_url {
        config.gateway.url = url;
    }
    config.validate()?;

    init_tracing(&config.logging)?;
    tracing::info!("Starting Mission Control v{}", env!("CARGO_PKG_VERSION"));

    let link_config = config.link_config()?;
    tracing::info!(
        gateway = %link_config.url,
        auth = link_config.handshake.token.is_some(),
        "Gateway configured"
    );

    let link = GatewayLink::spawn(link_config, Arc::new(WsConnector));
    let hub = Arc::new(ConnectionHub::new(config.hub_config()));

    let relay = start_event_relay(link.clone(), Arc::clone(&hub));
    let ticker = start_status_ticker(
        link.clone(),
        Arc::clone(&hub),
        hub.config().status_interval,
    );
    link.connect();

    let state = AppState::new(link.clone(), hub, config.api_config());
    let result = serve(state, shutdown_signal()).await;

    tracing::info!("Closing gateway link...");
    link.shutdown().await;
    ticker.abort();
    relay.abort();

    result?;
    tracing::info!("Mission Control shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mission_control={level},tower_http={level}",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
