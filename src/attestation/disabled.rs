use anyhow::Result;
use async_trait::async_trait;

use crate::error::AttestorError;
use crate::traits::Attestor;
use crate::types::{AttestationResult, AttestationType, TaskId};

/// Used when no attestation network is configured. Every call fails, which
/// the pipeline reports as a partial success.
pub struct DisabledAttestor;

#[async_trait]
impl Attestor for DisabledAttestor {
    fn name(&self) -> &'static str {
        "disabled-attestor"
    }

    async fn submit_task(&self, _kind: AttestationType, _payload: &[u8]) -> Result<TaskId> {
        Err(AttestorError::Unavailable("attestation network not configured".into()).into())
    }

    async fn get_result(&self, _task_id: &TaskId) -> Result<AttestationResult> {
        Err(AttestorError::Unavailable("attestation network not configured".into()).into())
    }
}
