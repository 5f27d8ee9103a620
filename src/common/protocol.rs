//! Wire protocol shared by coordinator, volumes and clients
//!
//! Every logical message is one envelope `{ "type": TAG, "payload": ... }`
//! encoded as JSON and framed as:
//!
//! ```text
//! [LEN:4 big-endian][JSON:LEN]
//! ```
//!
//! Raw file bytes for uploads and downloads follow an envelope on the same
//! stream, unframed. The length prefix is what makes this safe: a reader
//! never consumes past the end of the envelope.

use crate::common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single encoded envelope (lookup replies included)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Message tags. The strings are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "CLIENT_UPLOAD_REQ")]
    UploadReq,
    #[serde(rename = "CLIENT_DOWNLOAD_REQ")]
    DownloadReq,
    #[serde(rename = "CLIENT_DELETE_REQ")]
    DeleteReq,
    #[serde(rename = "CLIENT_LOOKUP_REQ")]
    LookupReq,
    #[serde(rename = "CLIENT_UPLOAD_COMMIT_REQ")]
    UploadCommitReq,

    #[serde(rename = "MAIN_UPLOAD_RESP")]
    UploadResp,
    #[serde(rename = "MAIN_DOWNLOAD_RESP")]
    DownloadResp,
    #[serde(rename = "MAIN_DELETE_REQ")]
    NodeDeleteReq,
    #[serde(rename = "MAIN_DELETE_ACK")]
    DeleteResp,
    #[serde(rename = "MAIN_LOOKUP_RESP")]
    LookupResp,
    #[serde(rename = "MAIN_MEM_LOOKUP_REQ")]
    CapacityQuery,
    #[serde(rename = "MAIN_UPLOAD_COMMIT_RESP")]
    UploadCommitResp,

    #[serde(rename = "NODE_UPLOAD_ACK")]
    UploadAck,
    #[serde(rename = "NODE_UPLOAD_DONE")]
    UploadDone,
    #[serde(rename = "NODE_DOWNLOAD_ACK")]
    DownloadAck,
    #[serde(rename = "NODE_DELETE_ACK")]
    NodeDeleteAck,
    #[serde(rename = "NODE_MEM_LOOKUP_RESP")]
    CapacityResp,

    #[serde(rename = "ERROR")]
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The serialized tag is the canonical name
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(tag)) => f.write_str(&tag),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Envelope: a type tag plus an opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Message {
    /// Build an envelope with a typed payload
    pub fn new<T: Serialize>(kind: MessageType, payload: &T) -> Result<Self> {
        Ok(Self {
            kind,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Build an envelope without payload (acks, queries)
    pub fn empty(kind: MessageType) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Null,
        }
    }

    /// Decode the payload into its typed form
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.payload)?)
    }

    /// Fail unless this envelope carries the expected tag.
    /// An `ERROR` envelope is surfaced as [`Error::Remote`].
    pub fn expect(self, expected: MessageType) -> Result<Self> {
        if self.kind == expected {
            return Ok(self);
        }
        if self.kind == MessageType::Error {
            let err: ErrorPayload = self.decode().unwrap_or_else(|_| ErrorPayload {
                message: "unspecified error".into(),
            });
            return Err(Error::Remote(err.message));
        }
        Err(Error::UnexpectedMessage {
            expected,
            actual: self.kind,
        })
    }
}

/// Write one framed envelope and flush
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one framed envelope
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

// === Payloads ===

/// Upload placement request (client → coordinator, client → volume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub size: u64,
}

/// Why the coordinator refused to place a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate,
    NoCapacity,
    InvalidName,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Duplicate => write!(f, "file already exists"),
            RejectReason::NoCapacity => write!(f, "no storage node has enough free space"),
            RejectReason::InvalidName => write!(f, "invalid filename"),
        }
    }
}

/// Upload placement reply. An empty `storage_addr` means rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub storage_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl UploadResponse {
    pub fn placed(storage_addr: String) -> Self {
        Self {
            storage_addr,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            storage_addr: String::new(),
            reason: Some(reason),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.storage_addr.is_empty()
    }
}

/// Sent by the volume once the upload bytes are on disk (or failed to be)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDone {
    pub success: bool,
    #[serde(default)]
    pub written: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
}

/// Client → coordinator: outcome of the volume transfer for a placed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCommitRequest {
    pub filename: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub storage_addr: String,
}

/// Volume download acknowledgement; raw bytes follow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadAck {
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Commit reply: whether a reservation for the file was still pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCommitResponse {
    pub success: bool,
}

/// One row of the coordinator's file table: where a file lives and how big it is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
}

/// Volume free capacity. May be negative when the coordinator's
/// accounting has drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityResponse {
    #[serde(rename = "availmem")]
    pub available_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_tags() {
        let msg = Message::empty(MessageType::CapacityQuery);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "MAIN_MEM_LOOKUP_REQ" })
        );
        assert_eq!(MessageType::UploadReq.to_string(), "CLIENT_UPLOAD_REQ");
        assert_eq!(MessageType::NodeDeleteAck.to_string(), "NODE_DELETE_ACK");
    }

    #[test]
    fn test_payload_field_names() {
        let msg = Message::new(
            MessageType::UploadReq,
            &UploadRequest {
                filename: "a.txt".into(),
                size: 100,
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "CLIENT_UPLOAD_REQ", "payload": { "filename": "a.txt", "size": 100 } })
        );

        let cap: CapacityResponse = serde_json::from_value(json!({ "availmem": -1 })).unwrap();
        assert_eq!(cap.available_bytes, -1);
    }

    #[test]
    fn test_rejected_upload_keeps_empty_address() {
        let resp = UploadResponse::rejected(RejectReason::NoCapacity);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({ "storage_addr": "", "reason": "no_capacity" }));

        // Replies without a reason still decode
        let legacy: UploadResponse = serde_json::from_value(json!({ "storage_addr": "" })).unwrap();
        assert!(legacy.is_rejected());
        assert_eq!(legacy.reason, None);
    }

    #[test]
    fn test_expect_surfaces_remote_error() {
        let msg = Message::new(
            MessageType::Error,
            &ErrorPayload {
                message: "File not found: x".into(),
            },
        )
        .unwrap();
        match msg.expect(MessageType::DownloadAck) {
            Err(Error::Remote(m)) => assert_eq!(m, "File not found: x"),
            other => panic!("unexpected: {:?}", other),
        }

        let msg = Message::empty(MessageType::UploadAck);
        assert!(matches!(
            msg.expect(MessageType::DownloadAck),
            Err(Error::UnexpectedMessage { .. })
        ));
    }

    #[tokio::test]
    async fn test_frame_leaves_trailing_bytes_unread() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = Message::new(
            MessageType::DownloadAck,
            &DownloadAck { size: Some(5) },
        )
        .unwrap();
        write_message(&mut a, &msg).await.unwrap();
        a.write_all(b"hello").await.unwrap();
        drop(a);

        let got = read_message(&mut b).await.unwrap();
        assert_eq!(got, msg);
        let mut rest = Vec::new();
        b.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"hello");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut reader = tokio_test::io::Builder::new().read(&len).build();
        assert!(matches!(
            read_message(&mut reader).await,
            Err(Error::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let mut frame = 50u32.to_be_bytes().to_vec();
        frame.extend_from_slice(b"{\"type\":");
        let mut reader = tokio_test::io::Builder::new().read(&frame).build();
        assert!(matches!(read_message(&mut reader).await, Err(Error::Io(_))));
    }
}
