use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AttestationResult, AttestationType, TaskId};

/// Off-chain attestation network.
///
/// Submission is fire-and-forget; results are polled later by task id.
#[async_trait]
pub trait Attestor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit_task(&self, kind: AttestationType, payload: &[u8]) -> Result<TaskId>;

    async fn get_result(&self, task_id: &TaskId) -> Result<AttestationResult>;
}
