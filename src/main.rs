//! Gateway server binary.
//!
//! Loads an optional TOML file, applies command-line overrides, then
//! serves until Ctrl+C.

use std::path::PathBuf;

use clap::Parser;

use rpc_front_gateway::config::{load_config, GatewayConfig, TlsConfig};
use rpc_front_gateway::GatewayBuilder;

#[derive(Debug, Parser)]
#[command(name = "rpc-front-gateway", version, about = "HTTP front door for an RPC transcoding gateway")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host (IP literal).
    #[arg(long)]
    host: Option<String>,

    /// Listen port.
    #[arg(short, long)]
    port: Option<u32>,

    #[arg(long)]
    backend_host: Option<String>,

    #[arg(long)]
    backend_port: Option<u32>,

    /// Certificate (PEM); requires --tls-key.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Private key (PEM); requires --tls-cert.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    #[arg(long)]
    access_log: Option<PathBuf>,

    #[arg(long)]
    error_log: Option<PathBuf>,

    /// Suppress console log output.
    #[arg(long)]
    silent: bool,
}

impl Cli {
    fn apply(self, mut config: GatewayConfig) -> GatewayConfig {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.backend_host {
            config.backend.host = host;
        }
        if let Some(port) = self.backend_port {
            config.backend.port = port;
        }
        if let (Some(cert_path), Some(key_path)) = (self.tls_cert, self.tls_key) {
            config.tls = Some(TlsConfig { cert_path, key_path });
        }
        if self.access_log.is_some() {
            config.logging.access_log = self.access_log;
        }
        if self.error_log.is_some() {
            config.logging.error_log = self.error_log;
        }
        if self.silent {
            config.logging.silent = true;
        }
        config
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    let config = cli.apply(config);

    let mut gateway = GatewayBuilder::from_config(&config).build()?;

    tracing::info!(
        server = %config.server,
        backend = %config.backend,
        tls = config.tls.is_some(),
        "Configuration loaded"
    );

    gateway.serve_until(shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
