#![forbid(unsafe_code)]
//! Redoom ledger node: document API backed by the sealed ledger

use redoom_ledger::config::load_config;
use redoom_ledger::node::Node;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    info!(
        "Starting Redoom node (difficulty = {}, database = {})",
        config.ledger.difficulty, config.database.path
    );

    let node = Arc::new(Node::init(config)?);
    node.start().await
}
