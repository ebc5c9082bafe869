use anyhow::Result;
use async_trait::async_trait;

use crate::types::ContentId;

/// Smallest payload content-addressed storage accepts.
pub const MIN_ARCHIVE_PAYLOAD: usize = 127;

/// Content-addressed storage for raw batches (Filecoin, IPFS, local disk).
///
/// `put` must refuse payloads below [`ArchiveStorage::min_payload_size`] with
/// `ArchiveError::PayloadTooSmall`; callers pad before uploading.
#[async_trait]
pub trait ArchiveStorage: Send + Sync {
    /// Human-readable archive storage name for logging.
    fn name(&self) -> &'static str;

    fn min_payload_size(&self) -> usize {
        MIN_ARCHIVE_PAYLOAD
    }

    /// Store bytes and return their content id.
    async fn put(&self, bytes: &[u8]) -> Result<ContentId>;

    /// Fetch previously stored bytes. `Ok(None)` if the id is unknown.
    async fn get(&self, content_id: &str) -> Result<Option<Vec<u8>>>;

    /// Initialize the archive storage (e.g., create buckets, directories).
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }
}
