//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::{Config, CoordinatorConfig, VolumeConfig};
pub use error::{Error, Result};
pub use protocol::{read_message, write_message, Message, MessageType};
pub use utils::{
    blake3_hash, decode_name, encode_name, format_bytes, parse_size, validate_name, Blake3Hasher,
};
