//! Error types for minidfs

use crate::common::protocol::{MessageType, RejectReason};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid filename {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Insufficient capacity: need {needed} bytes, have {available}")]
    InsufficientCapacity { needed: u64, available: i64 },

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: u64, actual: u64 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // === Protocol Errors ===
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Peer reported error: {0}")]
    Remote(String),

    // === Placement Errors ===
    #[error("Upload rejected: {}", rejection_message(.0))]
    UploadRejected(Option<RejectReason>),

    // === Network Errors ===
    #[error("Connection failed to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        source: std::io::Error,
    },

    // === Config Errors ===
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

fn rejection_message(reason: &Option<RejectReason>) -> String {
    match reason {
        Some(reason) => reason.to_string(),
        None => "no storage available or file already exists".to_string(),
    }
}

impl Error {
    /// Does this error mean the named file is absent?
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
