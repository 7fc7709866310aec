// hammesh node binary
//
// Loads the config, attaches the ack and reconciliation handlers, then runs
// the node until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hammesh::handlers::{AckHandler, Reconciler};
use hammesh::{Config, Node};

/// Gossip node for radio-network station discovery.
#[derive(Parser, Debug, Clone)]
#[command(name = "hammesh")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the listener port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the station callsign.
    #[arg(long)]
    callsign: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    tracing::info!("hammesh v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.node.port = port;
    }
    if let Some(callsign) = cli.callsign {
        config.station.callsign = callsign;
    }
    config.validate()?;

    let node = Node::new(config.local_contact()?, config.node_config());
    let (acks, _) = AckHandler::register(&node);
    let (reconciler, _) = Reconciler::register(&node);

    let addr = node.start().await.context("starting node")?;
    tracing::info!(addr = %addr, callsign = %config.station.callsign, "Node running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Received Ctrl-C, shutting down");

    node.shutdown().await;

    let stats = node.stats();
    tracing::info!(
        processed = stats.messages_processed,
        relayed = stats.messages_relayed,
        duplicates = stats.duplicates_dropped,
        cached = node.cache_len(),
        acks_received = acks.received(),
        reconcile_queries = reconciler.stats().queries_sent.load(std::sync::atomic::Ordering::Relaxed),
        "Final statistics"
    );

    Ok(())
}
