//! Session proxy binary.
//!
//! Loads configuration (TOML file plus CLI overrides), initializes logging
//! and metrics, and serves the two proxy listeners until a termination
//! signal arrives.

use std::path::PathBuf;

use clap::Parser;

use session_proxy::config::loader::load_config;
use session_proxy::config::ProxyConfig;
use session_proxy::lifecycle::signals;
use session_proxy::observability::{logging, metrics};
use session_proxy::ProxyServer;

#[derive(Debug, Parser)]
#[command(name = "session-proxy", about = "Session-scoped rewriting proxy for browser tests")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hostname the proxy is reachable at.
    #[arg(long)]
    hostname: Option<String>,

    /// Same-domain proxy port.
    #[arg(long)]
    port: Option<u16>,

    /// Cross-domain proxy port.
    #[arg(long)]
    cross_domain_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(hostname) = cli.hostname {
        config.listener.hostname = hostname;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(cross_domain_port) = cli.cross_domain_port {
        config.listener.cross_domain_port = cross_domain_port;
    }

    logging::init(&config.observability.log_level);

    tracing::info!(
        hostname = %config.listener.hostname,
        port = config.listener.port,
        cross_domain_port = config.listener.cross_domain_port,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = ProxyServer::new(config);
    signals::spawn_signal_listener(server.shutdown_handle());

    server.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
