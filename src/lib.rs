//! # minidfs
//!
//! A minimal distributed file store:
//! - A coordinator that tracks which storage node holds each file
//! - Storage nodes (volumes) that hold file bytes and report free capacity
//! - Clients that upload, download, delete and list files
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │         Coordinator          │
//!            │  file table: name → node     │
//!            │  registry:   node → free     │
//!            └──────▲───────────────┬───────┘
//!   placement/lookup│               │ capacity query, delete fan-out
//!            ┌──────┴─────┐   ┌─────▼──────┐   ┌────────────┐
//!            │   Client   ├──▶│  Volume 1  │   │  Volume 2  │
//!            └────────────┘   └────────────┘   └────────────┘
//!                  bulk bytes (upload/download)
//! ```
//!
//! ## Usage
//!
//! ### Start storage nodes
//! ```bash
//! minidfs-volume --addr 127.0.0.1:8081 --data-dir ./node1 --capacity 1GB
//! minidfs-volume --addr 127.0.0.1:8082 --data-dir ./node2 --capacity 1GB
//! ```
//!
//! ### Start the coordinator
//! ```bash
//! minidfs-coord serve --bind 127.0.0.1:8080 \
//!   --storage-nodes 127.0.0.1:8081,127.0.0.1:8082
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minidfs --coordinator 127.0.0.1:8080 upload ./report.pdf
//! minidfs --coordinator 127.0.0.1:8080 download report.pdf --output ./copy.pdf
//! minidfs --coordinator 127.0.0.1:8080 delete report.pdf
//! minidfs --coordinator 127.0.0.1:8080 lookup
//! ```
//!
//! All coordinator state lives in memory and is rebuilt empty on restart.

pub mod client;
pub mod common;
pub mod coordinator;
pub mod volume;

// Re-export commonly used types
pub use client::Client;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use volume::VolumeServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
