//! Busroute node binary.
//!
//! # Usage
//!
//! ```bash
//! # Route server
//! busroute --config route-server.toml
//!
//! # Route agent, overriding the listen address from the file
//! busroute --config agent.toml --listen 0.0.0.0:7301
//! ```

use busroute_server::{Node, NodeFileConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Busroute routing node
#[derive(Parser, Debug)]
#[command(name = "busroute")]
#[command(about = "Route agent / route server for the game-server bus")]
#[command(version)]
struct Args {
    /// Path to the TOML node file
    #[arg(short, long)]
    config: String,

    /// Override the listen address from the node file
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = NodeFileConfig::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    tracing::info!("Loaded {:?} node {} from {}", config.role, config.bus_id, args.config);

    let node = Node::bind(&config).await?;

    tracing::info!("Node listening on {}", node.local_addr()?);

    node.run().await?;

    Ok(())
}
