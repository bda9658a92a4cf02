//! Failover HTTP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌────────────────────────────────────────────────┐
//!                         │                FAILOVER PROXY                  │
//!     Client Request      │  ┌────────┐    ┌────────────┐                  │
//!     ────────────────────┼─▶│  http  │───▶│ dispatcher │──┐               │
//!                         │  │ server │    └─────┬──────┘  │ cache hit     │
//!                         │  └────────┘          │         ▼               │
//!                         │                      │    ┌─────────┐          │
//!                         │                      │    │  cache  │          │
//!                         │                      │    │ drivers │          │
//!                         │                      ▼    └─────────┘          │
//!                         │               ┌────────────┐                   │
//!     Client Response     │               │   proxy    │◀──────────────────┼──── Backend
//!     ◀───────────────────┼───────────────│   engine   │                   │     Server
//!                         │               └─────┬──────┘                   │
//!                         │          failure    │                          │
//!                         │                     ▼                          │
//!                         │   ┌──────────┐  ┌────────────┐  ┌──────────┐   │
//!                         │   │ failover │─▶│  health    │─▶│ backend  │   │
//!                         │   │controller│  │  monitor   │  │ registry │   │
//!                         │   └──────────┘  └────────────┘  └──────────┘   │
//!                         └────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use failover_proxy::config::load_config;
use failover_proxy::lifecycle::signals::shutdown_on_signal;
use failover_proxy::observability::{logging, metrics};
use failover_proxy::{DriverRegistry, HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "failover-proxy", version, about = "Failover-capable HTTP reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "failover-proxy.toml")]
    config: PathBuf,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability.log_level);
    tracing::info!("failover-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        strategy = ?config.select_strategy,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let drivers = DriverRegistry::with_defaults();
    let server = HttpServer::new(config.clone(), &drivers, &shutdown)?;

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let signal_task = tokio::spawn(shutdown_on_signal(shutdown.clone()));
    server.run(listener, shutdown.subscribe()).await?;
    signal_task.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
