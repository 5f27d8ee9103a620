use anyhow::Result;
use clap::Parser;
use minidfs::common::{parse_size, VolumeConfig};
use minidfs::{Config, VolumeServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minidfs-volume")]
#[command(about = "minidfs storage node: holds file bytes and reports free capacity")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long)]
    addr: Option<SocketAddr>,

    /// Directory to store files in
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Capacity in bytes (suffixes KB, MB, GB, TB accepted)
    #[arg(short, long)]
    capacity: Option<String>,

    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_from(args.config.as_deref())?;

    // Initialize tracing
    let log_level = args.log_level.clone().unwrap_or(config.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut volume_config: VolumeConfig = config.volume.unwrap_or_default();
    if let Some(addr) = args.addr {
        volume_config.bind_addr = addr;
    }
    if let Some(dir) = args.data_dir {
        volume_config.data_path = dir;
    }
    if let Some(capacity) = args.capacity {
        let bytes = parse_size(&capacity)?;
        volume_config.capacity_bytes = i64::try_from(bytes)
            .map_err(|_| anyhow::anyhow!("capacity too large: {}", capacity))?;
    }

    tracing::info!("Starting minidfs volume {}", minidfs::VERSION);

    let server = VolumeServer::bind(volume_config).await?;
    tokio::select! {
        res = server.serve() => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down volume server");
        }
    }

    Ok(())
}
