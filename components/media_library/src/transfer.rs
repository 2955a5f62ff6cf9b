use crate::library::MediaFile;
use chrono::{DateTime, Utc};
use control_primitives::MediaName;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Uploads are written in fixed-size slices so one request body frame can
/// never pin a large buffer.
pub const TRANSFER_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("a transfer to {0} is already in progress")]
    Conflict(String),

    #[error("upload exceeds the size limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("received {received} bytes but {declared} were declared")]
    SizeMismatch { declared: u64, received: u64 },

    #[error("transfer failed: {0}")]
    Failed(#[from] std::io::Error),
}

/// Holds a destination name in the active-transfer registry; released on
/// drop so an aborted upload frees the name immediately.
pub(crate) struct NameLease {
    registry: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl NameLease {
    pub(crate) fn acquire(
        registry: Arc<Mutex<HashSet<String>>>,
        name: &str,
    ) -> Result<Self, TransferError> {
        if !registry.lock().insert(name.to_string()) {
            return Err(TransferError::Conflict(name.to_string()));
        }
        Ok(Self {
            registry,
            name: name.to_string(),
        })
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
    }
}

/// An in-progress chunked upload. Bytes go to a temp file in the staging
/// directory; only `complete` renames it into the visible catalog. Dropping
/// the job without completing removes the temp file.
pub struct TransferJob {
    name: MediaName,
    temp_path: PathBuf,
    dest_path: PathBuf,
    file: Option<File>,
    received: u64,
    declared_size: Option<u64>,
    max_size: u64,
    _lease: NameLease,
}

impl TransferJob {
    pub(crate) async fn open(
        name: MediaName,
        temp_path: PathBuf,
        dest_path: PathBuf,
        declared_size: Option<u64>,
        max_size: u64,
        lease: NameLease,
    ) -> Result<Self, TransferError> {
        let file = File::create(&temp_path).await?;
        info!(file = name.as_str(), ?declared_size, "transfer started");

        Ok(Self {
            name,
            temp_path,
            dest_path,
            file: Some(file),
            received: 0,
            declared_size,
            max_size,
            _lease: lease,
        })
    }

    pub fn name(&self) -> &MediaName {
        &self.name
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Append one body frame, writing it through in fixed-size slices. The
    /// size ceiling is enforced as bytes arrive, not only at completion.
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        let Some(file) = self.file.as_mut() else {
            return Err(TransferError::Failed(std::io::Error::new(
                std::io::ErrorKind::Other,
                "transfer already finished",
            )));
        };

        if self.received + bytes.len() as u64 > self.max_size {
            return Err(TransferError::TooLarge {
                limit: self.max_size,
            });
        }

        for slice in bytes.chunks(TRANSFER_CHUNK_SIZE) {
            file.write_all(slice).await?;
        }
        self.received += bytes.len() as u64;
        Ok(())
    }

    /// Verify the declared size, flush, and rename into the media directory.
    pub async fn complete(mut self) -> Result<MediaFile, TransferError> {
        if let Some(declared) = self.declared_size {
            if self.received != declared {
                return Err(TransferError::SizeMismatch {
                    declared,
                    received: self.received,
                });
            }
        }

        let Some(mut file) = self.file.take() else {
            return Err(TransferError::Failed(std::io::Error::new(
                std::io::ErrorKind::Other,
                "transfer already finished",
            )));
        };
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&self.temp_path, &self.dest_path).await?;

        let metadata = tokio::fs::metadata(&self.dest_path).await?;
        info!(file = self.name.as_str(), size = self.received, "transfer complete");

        Ok(MediaFile {
            name: self.name.to_string(),
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Discard the transfer and its temp file.
    pub async fn abort(mut self) {
        self.file.take();
        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await {
            warn!(file = self.name.as_str(), "failed to remove temp file: {e}");
        }
    }
}

impl Drop for TransferJob {
    fn drop(&mut self) {
        // Covers error paths and client disconnects: an incomplete transfer
        // never leaves a temp file behind.
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MediaLibrary;

    async fn library(dir: &tempfile::TempDir, max: u64) -> MediaLibrary {
        MediaLibrary::new(dir.path().to_path_buf(), max).await.unwrap()
    }

    #[tokio::test]
    async fn upload_appears_only_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir, 1024).await;
        let name = MediaName::new("clip.mp4").unwrap();

        let mut job = lib.begin_upload(name, Some(6)).await.unwrap();
        job.write_chunk(b"abc").await.unwrap();

        // Mid-transfer the catalog must not show the file.
        assert!(lib.list().await.unwrap().is_empty());

        job.write_chunk(b"def").await.unwrap();
        let media = job.complete().await.unwrap();
        assert_eq!(media.name, "clip.mp4");
        assert_eq!(media.size, 6);

        let files = lib.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(!dir.path().join(".incoming").join("clip.mp4.part").exists());
    }

    #[tokio::test]
    async fn declared_size_mismatch_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir, 1024).await;
        let name = MediaName::new("clip.mp4").unwrap();

        let mut job = lib.begin_upload(name, Some(10)).await.unwrap();
        job.write_chunk(b"short").await.unwrap();

        let result = job.complete().await;
        assert!(matches!(result, Err(TransferError::SizeMismatch { .. })));

        assert!(!dir.path().join(".incoming").join("clip.mp4.part").exists());
        assert!(lib.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ceiling_is_enforced_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir, 8).await;
        let name = MediaName::new("clip.mp4").unwrap();

        // No declared size: the ceiling must still cut the stream off.
        let mut job = lib.begin_upload(name, None).await.unwrap();
        job.write_chunk(b"12345678").await.unwrap();
        let result = job.write_chunk(b"9").await;
        assert!(matches!(result, Err(TransferError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn dropping_a_job_removes_the_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir, 1024).await;
        let name = MediaName::new("clip.mp4").unwrap();

        let mut job = lib.begin_upload(name.clone(), None).await.unwrap();
        job.write_chunk(b"partial").await.unwrap();
        drop(job);

        assert!(!dir.path().join(".incoming").join("clip.mp4.part").exists());
        // The name is free again for a retry.
        assert!(lib.begin_upload(name, None).await.is_ok());
    }

    #[tokio::test]
    async fn large_frames_are_written_in_fixed_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir, 64 * 1024).await;
        let name = MediaName::new("clip.mp4").unwrap();

        let payload = vec![7u8; TRANSFER_CHUNK_SIZE * 3 + 123];
        let mut job = lib.begin_upload(name, Some(payload.len() as u64)).await.unwrap();
        job.write_chunk(&payload).await.unwrap();
        let media = job.complete().await.unwrap();
        assert_eq!(media.size, payload.len() as u64);
    }
}
