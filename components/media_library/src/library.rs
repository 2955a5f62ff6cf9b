use crate::transfer::{NameLease, TransferError, TransferJob};
use chrono::{DateTime, Utc};
use control_primitives::{extension_allowed, MediaName};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("media file not found: {0}")]
    NotFound(String),

    #[error("io error in media directory: {0}")]
    Io(#[from] std::io::Error),
}

/// One playable file as the filesystem reports it right now.
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// The managed media directory. The filesystem is the source of truth; no
/// listing is cached across calls. Uploads land in a hidden staging
/// directory and only appear in the catalog after a completed rename.
pub struct MediaLibrary {
    media_dir: PathBuf,
    staging_dir: PathBuf,
    max_upload_size: u64,
    /// Destination names with a transfer in progress.
    active_transfers: Arc<Mutex<HashSet<String>>>,
}

impl MediaLibrary {
    pub async fn new(media_dir: PathBuf, max_upload_size: u64) -> Result<Self, LibraryError> {
        let staging_dir = media_dir.join(".incoming");
        tokio::fs::create_dir_all(&staging_dir).await?;
        info!(dir = %media_dir.display(), "media library ready");

        Ok(Self {
            media_dir,
            staging_dir,
            max_upload_size,
            active_transfers: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Resolve a validated name inside the media directory.
    pub fn resolve(&self, name: &MediaName) -> PathBuf {
        self.media_dir.join(name.as_str())
    }

    /// Fresh listing of playable files, sorted by name.
    pub async fn list(&self) -> Result<Vec<MediaFile>, LibraryError> {
        let mut entries = tokio::fs::read_dir(&self.media_dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let allowed = path
                .extension()
                .and_then(|e| e.to_str())
                .map(extension_allowed)
                .unwrap_or(false);
            if !allowed {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            files.push(MediaFile {
                name: name.to_string(),
                size: metadata.len(),
                modified: metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = files.len(), "listed media files");
        Ok(files)
    }

    pub async fn delete(&self, name: &MediaName) -> Result<(), LibraryError> {
        let path = self.resolve(name);
        if !path.is_file() {
            return Err(LibraryError::NotFound(name.to_string()));
        }
        tokio::fs::remove_file(&path).await?;
        info!(file = name.as_str(), "media file deleted");
        Ok(())
    }

    /// Open a transfer towards `name`. A second transfer to the same
    /// destination is a conflict, and a declared size beyond the ceiling is
    /// rejected before any byte is written.
    pub async fn begin_upload(
        &self,
        name: MediaName,
        declared_size: Option<u64>,
    ) -> Result<TransferJob, TransferError> {
        if let Some(size) = declared_size {
            if size > self.max_upload_size {
                return Err(TransferError::TooLarge {
                    limit: self.max_upload_size,
                });
            }
        }

        let lease = NameLease::acquire(Arc::clone(&self.active_transfers), name.as_str())?;

        let temp_path = self.staging_dir.join(format!("{}.part", name.as_str()));
        let dest_path = self.resolve(&name);

        TransferJob::open(
            name,
            temp_path,
            dest_path,
            declared_size,
            self.max_upload_size,
            lease,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn library(dir: &tempfile::TempDir) -> MediaLibrary {
        MediaLibrary::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn listing_reads_the_filesystem_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir).await;

        assert!(lib.list().await.unwrap().is_empty());

        std::fs::write(dir.path().join("b.mp4"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = lib.list().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mkv", "b.mp4"], "sorted, videos only");
        assert_eq!(files[1].size, 2);
    }

    #[tokio::test]
    async fn staging_directory_is_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir).await;

        std::fs::write(dir.path().join(".incoming").join("up.mp4.part"), b"x").unwrap();
        assert!(lib.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_only_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir).await;
        std::fs::write(dir.path().join("a.mp4"), b"a").unwrap();

        lib.delete(&MediaName::new("a.mp4").unwrap()).await.unwrap();
        assert!(!dir.path().join("a.mp4").exists());

        let missing = lib.delete(&MediaName::new("a.mp4").unwrap()).await;
        assert!(matches!(missing, Err(LibraryError::NotFound(_))));
    }

    #[tokio::test]
    async fn oversized_declared_uploads_are_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir).await;

        let result = lib
            .begin_upload(MediaName::new("big.mp4").unwrap(), Some(2 * 1024 * 1024))
            .await;
        assert!(matches!(result, Err(TransferError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn concurrent_uploads_to_the_same_name_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(&dir).await;
        let name = MediaName::new("movie.mp4").unwrap();

        let first = lib.begin_upload(name.clone(), None).await.unwrap();
        let second = lib.begin_upload(name.clone(), None).await;
        assert!(matches!(second, Err(TransferError::Conflict(_))));

        // Releasing the first transfer frees the name.
        first.abort().await;
        assert!(lib.begin_upload(name, None).await.is_ok());
    }
}
