//! Volume (storage node) implementation
//!
//! Handles file storage with:
//! - One file per name under the data directory
//! - Free-capacity accounting under a node-wide lock
//! - Per-file readers-writer locks
//! - A TCP server dispatching upload, download, delete and capacity queries

pub mod engine;
pub mod locks;
pub mod server;

pub use engine::{StorageEngine, UploadOutcome};
pub use locks::{FileGuard, FileLockTable};
pub use server::VolumeServer;
