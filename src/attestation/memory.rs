use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{decode_task_payload, task_id, IntegrityVerifier};
use crate::batcher::now_millis;
use crate::error::AttestorError;
use crate::traits::{ArchiveStorage, Attestor};
use crate::types::{hex0x, AttestationResult, AttestationType, TaskId};

#[derive(Debug, Clone)]
pub struct SubmittedTask {
    pub kind: AttestationType,
    pub payload: Vec<u8>,
    pub created_at: u64,
    pub result: Option<(String, u64)>,
}

#[derive(Default)]
struct AttestorState {
    tasks: HashMap<TaskId, SubmittedTask>,
    failing: HashSet<AttestationType>,
    unavailable: bool,
}

/// Attestation network held in memory.
///
/// Without an archive, tasks stay pending until [`MemoryAttestor::complete`]
/// is called for them. With one, the first poll of a pending task runs the
/// integrity check for its kind against the archive and records the verdict.
#[derive(Clone, Default)]
pub struct MemoryAttestor {
    state: Arc<Mutex<AttestorState>>,
    archive: Option<Arc<dyn ArchiveStorage>>,
}

impl MemoryAttestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify tasks against `archive` when they are polled.
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveStorage>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Reject submissions of `kind` from now on.
    pub fn fail_on(&self, kind: AttestationType) {
        self.lock().failing.insert(kind);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn task(&self, task_id: &TaskId) -> Option<SubmittedTask> {
        self.lock().tasks.get(task_id).cloned()
    }

    /// Record the network's verdict for a task.
    pub fn complete(&self, task_id: &TaskId, result: impl Into<String>) -> Result<(), AttestorError> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AttestorError::UnknownTask(hex0x(task_id)))?;
        task.result = Some((result.into(), now_millis()));
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, AttestorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Attestor for MemoryAttestor {
    fn name(&self) -> &'static str {
        "memory-attestor"
    }

    async fn submit_task(&self, kind: AttestationType, payload: &[u8]) -> Result<TaskId> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(AttestorError::Unavailable("memory attestor switched off".into()).into());
        }
        if state.failing.contains(&kind) {
            return Err(AttestorError::Unavailable(format!("{} tasks rejected", kind)).into());
        }

        let mut created_at = now_millis();
        let mut id = task_id(kind, payload, created_at);
        // identical submissions within one millisecond
        while state.tasks.contains_key(&id) {
            created_at += 1;
            id = task_id(kind, payload, created_at);
        }

        state.tasks.insert(
            id,
            SubmittedTask {
                kind,
                payload: payload.to_vec(),
                created_at,
                result: None,
            },
        );
        debug!("MemoryAttestor: {} task {}", kind, hex0x(&id));
        Ok(id)
    }

    async fn get_result(&self, task_id: &TaskId) -> Result<AttestationResult> {
        let payload = {
            let state = self.lock();
            if state.unavailable {
                return Err(
                    AttestorError::Unavailable("memory attestor switched off".into()).into(),
                );
            }
            let task = state
                .tasks
                .get(task_id)
                .ok_or_else(|| AttestorError::UnknownTask(hex0x(task_id)))?;
            if let Some(result) = completed(task) {
                return Ok(result);
            }
            task.payload.clone()
        };

        let Some(archive) = &self.archive else {
            return Ok(AttestationResult::pending());
        };
        let verdict = evaluate(archive.as_ref(), &payload).await;

        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AttestorError::UnknownTask(hex0x(task_id)))?;
        // a manual completion during the check wins
        if task.result.is_none() {
            debug!("MemoryAttestor: {} task {} -> {}", task.kind, hex0x(task_id), verdict);
            task.result = Some((verdict, now_millis()));
        }
        Ok(completed(task).unwrap_or_else(AttestationResult::pending))
    }
}

fn completed(task: &SubmittedTask) -> Option<AttestationResult> {
    task.result.as_ref().map(|(result, timestamp)| AttestationResult {
        completed: true,
        result: Some(result.clone()),
        timestamp: Some(*timestamp),
    })
}

/// `"valid"`, or `"invalid: <reason>"`.
async fn evaluate(archive: &dyn ArchiveStorage, payload: &[u8]) -> String {
    let Some((kind, request)) = decode_task_payload(payload) else {
        return "invalid: unrecognized task payload".to_string();
    };
    let outcome = IntegrityVerifier::new(archive).verify(kind, &request).await;
    match outcome.reason {
        None if outcome.valid => "valid".to_string(),
        reason => format!("invalid: {}", reason.unwrap_or_default()),
    }
}
