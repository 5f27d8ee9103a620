//! Volume server
//!
//! Every accepted connection runs in its own task, so transfers proceed in
//! parallel. A connection carries one request envelope, optionally followed
//! by raw file bytes in either direction.

use crate::common::protocol::{
    CapacityResponse, DeleteRequest, DeleteResponse, DownloadAck, DownloadRequest, ErrorPayload,
    UploadDone, UploadRequest,
};
use crate::common::{read_message, write_message, Error, Message, MessageType, Result, VolumeConfig};
use crate::volume::engine::StorageEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;
use uuid::Uuid;

pub struct VolumeServer {
    listener: TcpListener,
    engine: Arc<StorageEngine>,
}

impl VolumeServer {
    /// Open the storage engine and bind the listener
    pub async fn bind(config: VolumeConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!("Starting volume server");
        tracing::info!("  Bind address: {}", config.bind_addr);
        tracing::info!("  Data path: {}", config.data_path.display());
        tracing::info!("  Capacity: {} bytes", config.capacity_bytes);

        let engine = StorageEngine::open(&config.data_path, config.capacity_bytes).await?;
        let listener = TcpListener::bind(config.bind_addr).await?;

        Ok(Self {
            listener,
            engine: Arc::new(engine),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn engine(&self) -> Arc<StorageEngine> {
        self.engine.clone()
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("✓ Volume server ready on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                    continue;
                }
            };

            let engine = self.engine.clone();
            let span = tracing::info_span!(
                "volume_request",
                request_id = %Uuid::new_v4(),
                peer = %peer,
            );
            tokio::spawn(
                async move {
                    if let Err(e) = handle_connection(&engine, stream).await {
                        tracing::warn!("Connection error: {}", e);
                    }
                }
                .instrument(span),
            );
        }
    }
}

async fn handle_connection(engine: &StorageEngine, mut stream: TcpStream) -> Result<()> {
    let request = read_message(&mut stream).await?;
    tracing::debug!("Received {}", request.kind);

    match request.kind {
        MessageType::UploadReq => handle_upload(engine, &mut stream, request.decode()?).await,
        MessageType::DownloadReq => handle_download(engine, &mut stream, request.decode()?).await,
        MessageType::NodeDeleteReq => handle_delete(engine, &mut stream, request.decode()?).await,
        MessageType::CapacityQuery => {
            let available = engine.available().await;
            tracing::info!(
                "Capacity query: {} of {} bytes free",
                available,
                engine.capacity()
            );
            let reply = Message::new(
                MessageType::CapacityResp,
                &CapacityResponse {
                    available_bytes: available,
                },
            )?;
            write_message(&mut stream, &reply).await
        }
        other => Err(Error::Protocol(format!("volume does not handle {}", other))),
    }
}

/// Ack, then read exactly `size` raw bytes into the file.
/// Without enough free space the connection is closed with no ack.
async fn handle_upload(
    engine: &StorageEngine,
    stream: &mut TcpStream,
    req: UploadRequest,
) -> Result<()> {
    tracing::info!(filename = %req.filename, size = req.size, "Upload requested");

    if let Err(e) = engine.ensure_capacity(req.size).await {
        tracing::warn!(filename = %req.filename, "Rejecting upload: {}", e);
        return Ok(());
    }

    write_message(stream, &Message::empty(MessageType::UploadAck)).await?;

    let done = match engine.upload(&req.filename, req.size, stream).await {
        Ok(outcome) => UploadDone {
            success: true,
            written: outcome.written,
            blake3: Some(outcome.blake3),
        },
        Err(e) => {
            tracing::error!(filename = %req.filename, "Upload failed: {}", e);
            UploadDone {
                success: false,
                written: 0,
                blake3: None,
            }
        }
    };
    // The peer may already be gone after a failed transfer
    if let Err(e) = write_message(stream, &Message::new(MessageType::UploadDone, &done)?).await {
        tracing::debug!("Could not report upload result: {}", e);
    }
    Ok(())
}

/// Ack with the file size, then stream the bytes and close.
/// A missing file is answered with an `ERROR` envelope instead of an ack.
async fn handle_download(
    engine: &StorageEngine,
    stream: &mut TcpStream,
    req: DownloadRequest,
) -> Result<()> {
    tracing::info!(filename = %req.filename, "Download requested");

    let download = match engine.open_download(&req.filename).await {
        Ok(download) => download,
        Err(e) => {
            tracing::warn!(filename = %req.filename, "Download failed: {}", e);
            let reply = Message::new(
                MessageType::Error,
                &ErrorPayload {
                    message: e.to_string(),
                },
            )?;
            return write_message(stream, &reply).await;
        }
    };

    let ack = DownloadAck {
        size: Some(download.size()),
    };
    write_message(stream, &Message::new(MessageType::DownloadAck, &ack)?).await?;
    let sent = download.send_to(stream).await?;
    stream.shutdown().await?;

    tracing::info!(filename = %req.filename, bytes = sent, "Download complete");
    Ok(())
}

/// Acknowledge first, then delete. The ack does not reflect the outcome.
async fn handle_delete(
    engine: &StorageEngine,
    stream: &mut TcpStream,
    req: DeleteRequest,
) -> Result<()> {
    tracing::info!(filename = %req.filename, "Delete requested");

    let reply = Message::new(MessageType::NodeDeleteAck, &DeleteResponse { success: true })?;
    write_message(stream, &reply).await?;

    match engine.delete(&req.filename).await {
        Ok(freed) => {
            let available = engine.available().await;
            tracing::info!(
                filename = %req.filename,
                freed,
                "Deletion successful, available: {}",
                available
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(filename = %req.filename, "Delete failed: {}", e);
            Ok(())
        }
    }
}
