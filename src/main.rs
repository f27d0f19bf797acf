//! Tracking relay.
//!
//! Fronts a host service and reports every request to an analytics collector.
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                TRACKING RELAY                │
//!   Client Request   │  ┌────────────┐   ┌──────────┐   ┌────────┐  │
//!  ──────────────────┼─▶│ request id │──▶│ tracking │──▶│ relay  │──┼──▶ Upstream
//!                    │  └────────────┘   └────┬─────┘   └────────┘  │
//!                    │                        │ after response      │
//!                    │                        ▼                     │
//!                    │                  ┌──────────┐                │
//!                    │                  │ dispatch │────────────────┼──▶ Collector
//!                    │                  └──────────┘  detached GET  │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use tracking_relay::config::{load_config, RelayConfig};
use tracking_relay::http::HttpServer;
use tracking_relay::lifecycle::{wait_for_signal, Shutdown};
use tracking_relay::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "tracking-relay")]
#[command(about = "Relay that reports every request to an analytics collector", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    if cli.check {
        println!("Configuration OK");
        return Ok(());
    }

    logging::init_logging(&config.observability);

    tracing::info!("tracking-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        site_id = %config.tracking.site_id,
        ignore_do_not_track = config.tracking.ignore_do_not_track,
        "Configuration loaded"
    );
    if config.tracking.collector_url.is_empty() {
        tracing::warn!("No collector_url configured; beacons will not reach a collector");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config);

    shutdown.trigger_on(wait_for_signal());

    match tls {
        Some(tls) => {
            let addr: SocketAddr = bind_address.parse()?;
            server.run_tls(addr, &tls, server_shutdown).await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            tracing::info!(address = %listener.local_addr()?, "Listening for connections");
            server.run(listener, server_shutdown).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
