//! Client side of the three-hop protocols
//!
//! - upload: coordinator (placement) → volume (bytes) → coordinator (commit)
//! - download: coordinator (lookup) → volume (bytes)
//! - delete: coordinator only; it fans out to the volume
//! - lookup: coordinator only
//!
//! The first error ends the operation; nothing is retried.

use crate::common::protocol::{
    DeleteRequest, DeleteResponse, DownloadAck, DownloadRequest, DownloadResponse, FileRecord,
    LookupResponse, UploadCommitRequest, UploadCommitResponse, UploadDone, UploadRequest,
    UploadResponse,
};
use crate::common::{
    read_message, write_message, Blake3Hasher, Error, Message, MessageType, Result,
};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Where an upload landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub storage_addr: String,
    pub written: u64,
    pub blake3: String,
}

pub struct Client {
    coordinator: String,
}

async fn connect(addr: &str) -> Result<TcpStream> {
    TcpStream::connect(addr)
        .await
        .map_err(|source| Error::ConnectionFailed {
            addr: addr.to_string(),
            source,
        })
}

impl Client {
    pub fn new(coordinator: impl Into<String>) -> Self {
        Self {
            coordinator: coordinator.into(),
        }
    }

    pub fn coordinator(&self) -> &str {
        &self.coordinator
    }

    /// One request/reply exchange with the coordinator
    async fn call(&self, request: &Message, expected: MessageType) -> Result<Message> {
        let mut stream = connect(&self.coordinator).await?;
        write_message(&mut stream, request).await?;
        read_message(&mut stream).await?.expect(expected)
    }

    /// Upload a local file. The stored name defaults to the file's name.
    pub async fn upload(&self, path: impl AsRef<Path>, name: Option<&str>) -> Result<UploadReceipt> {
        let path = path.as_ref();
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| Error::Other(format!("no filename in {}", path.display())))?,
        };

        let mut file = File::open(path).await?;
        let size = file.metadata().await?.len();
        tracing::info!("Uploading {} as {} ({} bytes)", path.display(), name, size);
        self.upload_from(&name, size, &mut file).await
    }

    /// Upload `size` bytes read from `source` under `name`
    pub async fn upload_from<R>(&self, name: &str, size: u64, source: &mut R) -> Result<UploadReceipt>
    where
        R: AsyncRead + Unpin,
    {
        let request = UploadRequest {
            filename: name.to_string(),
            size,
        };
        let reply = self
            .call(
                &Message::new(MessageType::UploadReq, &request)?,
                MessageType::UploadResp,
            )
            .await?;
        let placement: UploadResponse = reply.decode()?;
        if placement.is_rejected() {
            return Err(Error::UploadRejected(placement.reason));
        }

        let result = self
            .send_to_volume(&placement.storage_addr, &request, source)
            .await;

        // Settle the reservation either way; a failed commit does not mask
        // the transfer error.
        let commit = self.commit(name, result.is_ok()).await;
        let receipt = result?;
        if let Err(e) = commit {
            tracing::warn!("Upload of {} not committed: {}", name, e);
        }
        Ok(receipt)
    }

    async fn send_to_volume<R>(
        &self,
        storage_addr: &str,
        request: &UploadRequest,
        source: &mut R,
    ) -> Result<UploadReceipt>
    where
        R: AsyncRead + Unpin,
    {
        let mut stream = connect(storage_addr).await?;
        write_message(&mut stream, &Message::new(MessageType::UploadReq, request)?).await?;
        read_message(&mut stream)
            .await?
            .expect(MessageType::UploadAck)?;

        let mut hasher = Blake3Hasher::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut sent: u64 = 0;
        while sent < request.size {
            let want = (request.size - sent).min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::ShortTransfer {
                    expected: request.size,
                    actual: sent,
                });
            }
            stream.write_all(&buf[..n]).await?;
            hasher.update(&buf[..n]);
            sent += n as u64;
        }
        stream.flush().await?;

        let done: UploadDone = read_message(&mut stream)
            .await?
            .expect(MessageType::UploadDone)?
            .decode()?;
        if !done.success {
            return Err(Error::Remote(format!(
                "storage node {} failed to store {}",
                storage_addr, request.filename
            )));
        }

        let local = hasher.finalize();
        if let Some(remote) = &done.blake3 {
            if *remote != local {
                return Err(Error::ChecksumMismatch {
                    expected: local,
                    actual: remote.clone(),
                });
            }
        }

        Ok(UploadReceipt {
            storage_addr: storage_addr.to_string(),
            written: done.written,
            blake3: local,
        })
    }

    async fn commit(&self, name: &str, success: bool) -> Result<bool> {
        let request = UploadCommitRequest {
            filename: name.to_string(),
            success,
        };
        let reply = self
            .call(
                &Message::new(MessageType::UploadCommitReq, &request)?,
                MessageType::UploadCommitResp,
            )
            .await?;
        let resp: UploadCommitResponse = reply.decode()?;
        Ok(resp.success)
    }

    /// Download `name` into a local file; returns bytes received
    pub async fn download(&self, name: &str, output: impl AsRef<Path>) -> Result<u64> {
        let mut file = File::create(output.as_ref()).await?;
        let received = self.download_to(name, &mut file).await?;
        file.sync_all().await?;
        Ok(received)
    }

    /// Download `name` into `sink`; returns bytes received
    pub async fn download_to<W>(&self, name: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let request = DownloadRequest {
            filename: name.to_string(),
        };
        let reply = self
            .call(
                &Message::new(MessageType::DownloadReq, &request)?,
                MessageType::DownloadResp,
            )
            .await?;
        let location: DownloadResponse = reply.decode()?;
        if location.storage_addr.is_empty() {
            return Err(Error::NotFound(name.to_string()));
        }

        let mut stream = connect(&location.storage_addr).await?;
        write_message(&mut stream, &Message::new(MessageType::DownloadReq, &request)?).await?;
        let ack = read_message(&mut stream)
            .await?
            .expect(MessageType::DownloadAck)?;
        let expected = if ack.payload.is_null() {
            None
        } else {
            ack.decode::<DownloadAck>()?.size
        };

        let received = tokio::io::copy(&mut stream, sink).await?;
        sink.flush().await?;

        if let Some(expected) = expected {
            if received != expected {
                return Err(Error::ShortTransfer {
                    expected,
                    actual: received,
                });
            }
        }
        Ok(received)
    }

    /// Delete `name`; `false` if it was unknown or the volume failed
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let request = DeleteRequest {
            filename: name.to_string(),
        };
        let reply = self
            .call(
                &Message::new(MessageType::DeleteReq, &request)?,
                MessageType::DeleteResp,
            )
            .await?;
        let resp: DeleteResponse = reply.decode()?;
        Ok(resp.success)
    }

    /// Snapshot of the coordinator's file table
    pub async fn lookup(&self) -> Result<BTreeMap<String, FileRecord>> {
        let reply = self
            .call(
                &Message::empty(MessageType::LookupReq),
                MessageType::LookupResp,
            )
            .await?;
        let resp: LookupResponse = reply.decode()?;
        Ok(resp.files)
    }
}
