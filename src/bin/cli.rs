//! CLI for file operations

use clap::{Parser, Subcommand};
use minidfs::common::format_bytes;
use minidfs::Client;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs distributed file store CLI")]
#[command(version)]
struct Cli {
    /// Coordinator address
    #[arg(long, default_value = "127.0.0.1:8080", env = "MINIDFS_COORDINATOR")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload {
        /// Local file path
        file: PathBuf,

        /// Name to store it under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Download a file
    Download {
        /// Stored name
        name: String,

        /// Output file
        #[arg(long)]
        output: PathBuf,
    },

    /// Delete a file
    Delete {
        /// Stored name
        name: String,
    },

    /// List all files
    Lookup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let client = Client::new(cli.coordinator);

    match cli.command {
        Commands::Upload { file, name } => {
            let receipt = client.upload(&file, name.as_deref()).await?;
            println!(
                "Upload successful: {} to {}",
                format_bytes(receipt.written),
                receipt.storage_addr
            );
        }

        Commands::Download { name, output } => {
            let received = client.download(&name, &output).await?;
            println!(
                "Download successful: {} written to {}",
                format_bytes(received),
                output.display()
            );
        }

        Commands::Delete { name } => {
            if !client.delete(&name).await? {
                anyhow::bail!("deletion of {} failed", name);
            }
            println!("Deletion successful");
        }

        Commands::Lookup => {
            let files = client.lookup().await?;
            if files.is_empty() {
                println!("No files");
            }
            for file in files.values() {
                println!(
                    "Filename: {}  Size: {}  Location: {}",
                    file.filename,
                    format_bytes(file.size),
                    file.location
                );
            }
        }
    }

    Ok(())
}
