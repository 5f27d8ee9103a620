//! Coordinator request dispatch
//!
//! Each request envelope maps to exactly one reply envelope. Errors returned
//! from [`CoordState::handle`] are protocol errors: the server logs them and
//! closes the connection without replying.

use crate::common::protocol::{
    DeleteRequest, DeleteResponse, DownloadRequest, DownloadResponse, FileRecord, LookupResponse,
    RejectReason, UploadCommitRequest, UploadCommitResponse, UploadRequest, UploadResponse,
};
use crate::common::{validate_name, Error, Message, MessageType, Result};
use crate::coordinator::file_table::FileTable;
use crate::coordinator::registry::StorageRegistry;
use crate::coordinator::volume_client::VolumeClient;

/// Shared coordinator state, injected into the server
#[derive(Debug, Default)]
pub struct CoordState {
    pub files: FileTable,
    pub registry: StorageRegistry,
}

impl CoordState {
    pub fn new(registry: StorageRegistry) -> Self {
        Self {
            files: FileTable::new(),
            registry,
        }
    }

    /// Dispatch one request envelope
    pub async fn handle(&self, msg: Message) -> Result<Message> {
        match msg.kind {
            MessageType::UploadReq => {
                let resp = self.upload(msg.decode()?).await;
                Message::new(MessageType::UploadResp, &resp)
            }
            MessageType::UploadCommitReq => {
                let resp = self.commit_upload(msg.decode()?).await;
                Message::new(MessageType::UploadCommitResp, &resp)
            }
            MessageType::DownloadReq => {
                let resp = self.download(msg.decode()?).await;
                Message::new(MessageType::DownloadResp, &resp)
            }
            MessageType::DeleteReq => {
                let resp = self.delete(msg.decode()?).await;
                Message::new(MessageType::DeleteResp, &resp)
            }
            MessageType::LookupReq => {
                let resp = self.lookup().await;
                Message::new(MessageType::LookupResp, &resp)
            }
            other => Err(Error::Protocol(format!(
                "coordinator does not handle {}",
                other
            ))),
        }
    }

    /// Place a new file on the volume with the most free space.
    /// Capacity is reserved now, before the client moves any bytes.
    pub async fn upload(&self, req: UploadRequest) -> UploadResponse {
        tracing::info!(
            filename = %req.filename,
            size = req.size,
            "Upload placement requested"
        );

        if let Err(e) = validate_name(&req.filename) {
            tracing::warn!("Rejecting upload: {}", e);
            return UploadResponse::rejected(RejectReason::InvalidName);
        }

        if self.files.contains(&req.filename).await {
            tracing::warn!(filename = %req.filename, "Rejecting upload: file exists");
            return UploadResponse::rejected(RejectReason::Duplicate);
        }

        let Some(addr) = self.registry.select_target(req.size).await else {
            tracing::warn!(
                filename = %req.filename,
                size = req.size,
                "Rejecting upload: no storage node has enough space"
            );
            return UploadResponse::rejected(RejectReason::NoCapacity);
        };

        self.files
            .put(FileRecord {
                filename: req.filename.clone(),
                size: req.size,
                location: addr.clone(),
            })
            .await;
        self.registry.reserve(&req.filename, &addr, req.size).await;

        tracing::info!(filename = %req.filename, storage = %addr, "Upload placed");
        UploadResponse::placed(addr)
    }

    /// Settle the reservation made at placement. On failure the file is
    /// dropped from the table, its capacity returned, and whatever the
    /// volume may have stored is deleted there.
    pub async fn commit_upload(&self, req: UploadCommitRequest) -> UploadCommitResponse {
        if req.success {
            let committed = self.registry.commit(&req.filename).await;
            if committed.is_some() {
                tracing::info!(filename = %req.filename, "Upload committed");
            }
            return UploadCommitResponse {
                success: committed.is_some(),
            };
        }

        let Some(reservation) = self.registry.release(&req.filename).await else {
            return UploadCommitResponse { success: false };
        };
        tracing::warn!(
            filename = %req.filename,
            storage = %reservation.address,
            size = reservation.size,
            "Upload failed, reservation released"
        );

        // The bytes may have landed even though the client saw an error
        // (checksum mismatch, lost completion report). The name is still in
        // the table here, so no new upload of it can be placed meanwhile.
        if let Err(e) = VolumeClient::new(reservation.address.clone())
            .delete(&req.filename)
            .await
        {
            tracing::warn!(
                filename = %req.filename,
                storage = %reservation.address,
                "Cleanup of released upload failed: {}",
                e
            );
        }
        self.files.remove(&req.filename).await;

        UploadCommitResponse { success: true }
    }

    pub async fn download(&self, req: DownloadRequest) -> DownloadResponse {
        let record = self.files.get(&req.filename).await;
        tracing::info!(
            filename = %req.filename,
            found = record.is_some(),
            "Download lookup"
        );
        DownloadResponse {
            storage_addr: record.map(|r| r.location).unwrap_or_default(),
        }
    }

    /// Remove the record first, credit the capacity, then ask the volume.
    /// The volume's answer is the client's answer; the table is not
    /// restored if the volume fails.
    pub async fn delete(&self, req: DeleteRequest) -> DeleteResponse {
        let Some(record) = self.files.get(&req.filename).await else {
            tracing::info!(filename = %req.filename, "Delete of unknown file");
            return DeleteResponse { success: false };
        };

        if !self.files.remove(&req.filename).await {
            return DeleteResponse { success: false };
        }
        self.registry.forget(&req.filename).await;
        self.registry
            .adjust(&record.location, record.size as i64)
            .await;

        let success = match VolumeClient::new(record.location.clone())
            .delete(&req.filename)
            .await
        {
            Ok(success) => success,
            Err(e) => {
                tracing::error!(
                    filename = %req.filename,
                    storage = %record.location,
                    "Delete on storage node failed: {}",
                    e
                );
                false
            }
        };

        tracing::info!(filename = %req.filename, success, "Delete finished");
        DeleteResponse { success }
    }

    pub async fn lookup(&self) -> LookupResponse {
        LookupResponse {
            files: self.files.list_all().await,
        }
    }
}
