#![forbid(unsafe_code)]
//! Full node for chain5470: gossip, API, and optional mining.

use chain5470::node::Node;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chain5470-node", about = "Run a chain5470 full node")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let node = Arc::new(Node::init(&args.config).await?);
    node.start().await?;
    Ok(())
}
