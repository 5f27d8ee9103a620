//! Coordinator binary

use clap::{Parser, Subcommand};
use minidfs::{common::CoordinatorConfig, Config, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-coord")]
#[command(about = "minidfs coordinator: file table and placement")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Bind address for client connections
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Storage node addresses (comma-separated)
        #[arg(long, value_delimiter = ',')]
        storage_nodes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
    let config = Config::load_from(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            storage_nodes,
        } => {
            let mut coord_config: CoordinatorConfig = config.coordinator.unwrap_or_default();
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if !storage_nodes.is_empty() {
                coord_config.storage_nodes = storage_nodes;
            }
            if coord_config.storage_nodes.is_empty() {
                anyhow::bail!("no storage nodes configured (use --storage-nodes)");
            }

            let coord = Coordinator::bind(coord_config).await?;
            tokio::select! {
                res = coord.serve() => res?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down coordinator");
                }
            }
        }
    }

    Ok(())
}
