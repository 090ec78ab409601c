// Coin node binary
// Runs the miner and wallet against an in-memory chain until interrupted

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use coin_core::{hash_to_hex, Identity, KeyPairIdentity};
use node::logging::init_logging;
use node::{Node, NodeConfig, NodeHandle};

/// How often chain and wallet status is logged
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "coin-node")]
#[command(about = "Proof-of-work coin node with a built-in miner and wallet", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides node.log_level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable mining regardless of the configuration
    #[arg(long, conflicts_with = "no_mine")]
    mine: bool,

    /// Disable mining regardless of the configuration
    #[arg(long)]
    no_mine: bool,

    /// Write the default configuration to this path and exit
    #[arg(long)]
    init_config: Option<PathBuf>,
}

fn load_identity(config: &NodeConfig) -> Result<Arc<dyn Identity>> {
    let identity = match &config.node.secret_key {
        Some(secret_key) => {
            let bytes = hex::decode(secret_key).context("node.secret_key is not hex")?;
            KeyPairIdentity::from_secret_bytes(&bytes).context("node.secret_key is not a valid key")?
        }
        None => {
            info!("No secret key configured, generating a fresh identity");
            KeyPairIdentity::generate()
        }
    };
    Ok(Arc::new(identity))
}

fn log_status(handle: &NodeHandle) {
    let balance = handle.wallet().map(|wallet| wallet.balance());
    let stats = handle.miner_stats();
    info!(
        chain_length = handle.chain_length(),
        tip = %hash_to_hex(&handle.tip_hash()),
        pool = handle.mempool().len(),
        balance = ?balance,
        blocks_mined = ?stats.map(|stats| stats.blocks_mined),
        "Node status"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.init_config {
        NodeConfig::create_default_config(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = NodeConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.node.log_level = level;
    }
    if cli.mine {
        config.node.enable_mining = true;
    }
    if cli.no_mine {
        config.node.enable_mining = false;
    }
    config.validate()?;

    init_logging(&config.node.log_level).map_err(anyhow::Error::msg)?;

    let identity = load_identity(&config)?;
    info!(locking_script = %identity.locking_script(), "Node identity loaded");

    let (node, handle) = Node::new(&config, identity)?;
    let node_task = tokio::spawn(node.run());

    let status_handle = handle.clone();
    let status_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_INTERVAL);
        while !status_handle.is_shutdown() {
            interval.tick().await;
            log_status(&status_handle);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    handle.shutdown();
    node_task.await??;
    status_task.abort();
    log_status(&handle);

    Ok(())
}
