use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{content_id, is_content_id};
use crate::error::ArchiveError;
use crate::traits::ArchiveStorage;
use crate::types::ContentId;

/// File system-based archive storage.
/// Each payload is written to `<directory>/<content id>`.
pub struct FileArchive {
    directory: PathBuf,
}

impl FileArchive {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &PathBuf {
        &self.directory
    }
}

#[async_trait]
impl ArchiveStorage for FileArchive {
    fn name(&self) -> &'static str {
        "file-archive"
    }

    async fn put(&self, bytes: &[u8]) -> Result<ContentId> {
        if bytes.len() < self.min_payload_size() {
            return Err(ArchiveError::PayloadTooSmall {
                size: bytes.len(),
                min: self.min_payload_size(),
            }
            .into());
        }

        let id = content_id(bytes);
        let filepath = self.directory.join(&id);
        tokio::fs::write(&filepath, bytes)
            .await
            .map_err(|e| ArchiveError::Unavailable(format!("{}: {}", filepath.display(), e)))?;

        debug!("File archive: wrote {} bytes to {:?}", bytes.len(), filepath);
        Ok(id)
    }

    async fn get(&self, content_id: &str) -> Result<Option<Vec<u8>>> {
        if !is_content_id(content_id) {
            return Ok(None);
        }

        let filepath = self.directory.join(content_id);
        match tokio::fs::read(&filepath).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {:?}", filepath)),
        }
    }

    async fn open(&mut self) -> Result<()> {
        info!("File archive: initializing directory {:?}", self.directory);
        tokio::fs::create_dir_all(&self.directory)
            .await
            .with_context(|| format!("creating {:?}", self.directory))?;
        Ok(())
    }
}
