use anyhow::Result;
use async_trait::async_trait;

use super::{disabled::DisabledAttestor, memory::MemoryAttestor};
use crate::traits::Attestor;
use crate::types::{AttestationResult, AttestationType, TaskId};

/// Enum representing all possible attestor implementations.
pub enum AttestorVariant {
    Memory(MemoryAttestor),
    Disabled(DisabledAttestor),
}

#[async_trait]
impl Attestor for AttestorVariant {
    fn name(&self) -> &'static str {
        match self {
            AttestorVariant::Memory(inner) => inner.name(),
            AttestorVariant::Disabled(inner) => inner.name(),
        }
    }

    async fn submit_task(&self, kind: AttestationType, payload: &[u8]) -> Result<TaskId> {
        match self {
            AttestorVariant::Memory(inner) => inner.submit_task(kind, payload).await,
            AttestorVariant::Disabled(inner) => inner.submit_task(kind, payload).await,
        }
    }

    async fn get_result(&self, task_id: &TaskId) -> Result<AttestationResult> {
        match self {
            AttestorVariant::Memory(inner) => inner.get_result(task_id).await,
            AttestorVariant::Disabled(inner) => inner.get_result(task_id).await,
        }
    }
}
