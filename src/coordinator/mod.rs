//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - The file table (filename → volume, size)
//! - The storage registry (volume → cached free capacity)
//! - Placement decisions (largest free volume wins)
//! - Delete fan-out to the owning volume

pub mod file_table;
pub mod handler;
pub mod registry;
pub mod server;
pub mod volume_client;

pub use file_table::FileTable;
pub use handler::CoordState;
pub use registry::{Reservation, StorageRegistry, UNKNOWN_CAPACITY};
pub use server::Coordinator;
