//! Storage engine: file bytes on disk plus free-capacity bookkeeping
//!
//! Layout: one regular file per stored name, `data/<percent-encoded name>`.
//!
//! Locking:
//! - the per-file lock (see [`FileLockTable`]) serializes uploads and
//!   deletes of one name and keeps downloads out while they run
//! - `available` is the node-wide capacity lock; every counter update
//!   happens under it

use crate::common::{decode_name, encode_name, validate_name, Blake3Hasher, Error, Result};
use crate::volume::locks::{FileGuard, FileLockTable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub written: u64,
    pub blake3: String,
}

/// Storage engine statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub capacity: i64,
    pub available: i64,
    pub files: usize,
}

pub struct StorageEngine {
    root: PathBuf,
    capacity: i64,
    available: Mutex<i64>,
    locks: Arc<FileLockTable>,
}

/// An open file held under a shared lock, ready to be streamed out
pub struct Download {
    file: File,
    size: u64,
    _guard: FileGuard,
}

impl Download {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Stream the whole file into `sink`; returns bytes sent
    pub async fn send_to<W>(mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let sent = tokio::io::copy(&mut self.file, sink).await?;
        sink.flush().await?;
        Ok(sent)
    }
}

impl StorageEngine {
    /// Open or create a store under `root` holding at most `capacity` bytes.
    /// Files already present count against the capacity.
    pub async fn open(root: impl AsRef<Path>, capacity: i64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let mut used: i64 = 0;
        let mut files = 0usize;
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if decode_name(name).is_err() {
                    tracing::warn!("Ignoring undecodable file {:?}", entry.path());
                    continue;
                }
            }
            used += meta.len() as i64;
            files += 1;
        }

        tracing::info!(
            "StorageEngine opened at {}: {} existing files, {} of {} bytes used",
            root.display(),
            files,
            used,
            capacity
        );

        Ok(Self {
            root,
            capacity,
            available: Mutex::new(capacity - used),
            locks: FileLockTable::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub async fn available(&self) -> i64 {
        *self.available.lock().await
    }

    /// Fail with `InsufficientCapacity` unless `size` bytes fit in the free space
    pub async fn ensure_capacity(&self, size: u64) -> Result<()> {
        let available = self.available().await;
        let fits = i64::try_from(size).is_ok_and(|size| size <= available);
        if fits {
            Ok(())
        } else {
            Err(Error::InsufficientCapacity {
                needed: size,
                available,
            })
        }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(encode_name(name)))
    }

    async fn adjust_available(&self, delta: i64) -> i64 {
        let mut available = self.available.lock().await;
        *available += delta;
        *available
    }

    /// Write exactly `size` bytes from `source` into `name`, replacing any
    /// previous content. Capacity is charged by the net size change.
    ///
    /// On failure the partial file is removed, so the name ends up absent.
    pub async fn upload<R>(&self, name: &str, size: u64, source: &mut R) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.path_for(name)?;
        if i64::try_from(size).is_err() {
            return Err(Error::InsufficientCapacity {
                needed: size,
                available: self.available().await,
            });
        }
        let _guard = self.locks.write(name).await;

        let previous = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let mut file = File::create(&path).await?;
        let result = Self::copy_into(&mut file, size, source).await;
        drop(file);
        match result {
            Ok(outcome) => {
                let available = self
                    .adjust_available(outcome.written as i64 - previous as i64)
                    .await;
                tracing::info!(
                    "Stored {} ({} bytes), available: {}",
                    name,
                    outcome.written,
                    available
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        tracing::error!("Failed to remove partial file {}: {}", name, rm);
                    }
                }
                // The old content is gone too
                self.adjust_available(previous as i64).await;
                Err(e)
            }
        }
    }

    async fn copy_into<R>(file: &mut File, size: u64, source: &mut R) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let mut hasher = Blake3Hasher::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written: u64 = 0;

        while written < size {
            let want = (size - written).min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::ShortTransfer {
                    expected: size,
                    actual: written,
                });
            }
            file.write_all(&buf[..n]).await?;
            hasher.update(&buf[..n]);
            written += n as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(UploadOutcome {
            written,
            blake3: hasher.finalize(),
        })
    }

    /// Open `name` for streaming under a shared lock
    pub async fn open_download(&self, name: &str) -> Result<Download> {
        let path = self.path_for(name)?;
        let guard = self.locks.read(name).await;

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();

        Ok(Download {
            file,
            size,
            _guard: guard,
        })
    }

    /// Stream all of `name` into `sink`; returns bytes sent
    pub async fn download<W>(&self, name: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        self.open_download(name).await?.send_to(sink).await
    }

    /// Remove `name` and credit its size back; returns the freed bytes
    pub async fn delete(&self, name: &str) -> Result<u64> {
        let path = self.path_for(name)?;
        let _guard = self.locks.write(name).await;

        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&path).await?;

        let available = self.adjust_available(size as i64).await;
        tracing::info!("Deleted {} ({} bytes), available: {}", name, size, available);
        Ok(size)
    }

    /// Names of the files currently on disk
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(Ok(name)) = entry.file_name().to_str().map(decode_name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            capacity: self.capacity,
            available: self.available().await,
            files: self.list().await?.len(),
        })
    }
}
