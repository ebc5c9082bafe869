use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::content_id;
use crate::error::ArchiveError;
use crate::traits::ArchiveStorage;
use crate::types::ContentId;

/// Content-addressed archive held in memory.
#[derive(Clone, Default)]
pub struct MemoryArchive {
    objects: Arc<Mutex<HashMap<ContentId, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put`/`get` fail with `ArchiveError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContentId, Vec<u8>>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable("memory archive switched off".into()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveStorage for MemoryArchive {
    fn name(&self) -> &'static str {
        "memory-archive"
    }

    async fn put(&self, bytes: &[u8]) -> Result<ContentId> {
        self.ensure_available()?;
        if bytes.len() < self.min_payload_size() {
            return Err(ArchiveError::PayloadTooSmall {
                size: bytes.len(),
                min: self.min_payload_size(),
            }
            .into());
        }

        let id = content_id(bytes);
        self.lock().insert(id.clone(), bytes.to_vec());
        debug!("MemoryArchive: stored {} bytes as {}", bytes.len(), id);
        Ok(id)
    }

    async fn get(&self, content_id: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        Ok(self.lock().get(content_id).cloned())
    }
}
