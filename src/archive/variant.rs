use anyhow::Result;
use async_trait::async_trait;

use super::{file::FileArchive, memory::MemoryArchive};
use crate::traits::ArchiveStorage;
use crate::types::ContentId;

/// Enum representing all possible archive storage implementations.
pub enum ArchiveVariant {
    Memory(MemoryArchive),
    File(FileArchive),
}

#[async_trait]
impl ArchiveStorage for ArchiveVariant {
    fn name(&self) -> &'static str {
        match self {
            ArchiveVariant::Memory(inner) => inner.name(),
            ArchiveVariant::File(inner) => inner.name(),
        }
    }

    fn min_payload_size(&self) -> usize {
        match self {
            ArchiveVariant::Memory(inner) => inner.min_payload_size(),
            ArchiveVariant::File(inner) => inner.min_payload_size(),
        }
    }

    async fn put(&self, bytes: &[u8]) -> Result<ContentId> {
        match self {
            ArchiveVariant::Memory(inner) => inner.put(bytes).await,
            ArchiveVariant::File(inner) => inner.put(bytes).await,
        }
    }

    async fn get(&self, content_id: &str) -> Result<Option<Vec<u8>>> {
        match self {
            ArchiveVariant::Memory(inner) => inner.get(content_id).await,
            ArchiveVariant::File(inner) => inner.get(content_id).await,
        }
    }

    async fn open(&mut self) -> Result<()> {
        match self {
            ArchiveVariant::Memory(inner) => inner.open().await,
            ArchiveVariant::File(inner) => inner.open().await,
        }
    }
}
