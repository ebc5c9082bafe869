use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::traits::Attestor;
use crate::types::{hex0x, AttestationTask, Fingerprint, TaskStatus};

/// Attestation tasks created per fingerprint.
///
/// The only transition applied is pending -> completed, and only when the
/// attestor reports completion.
#[derive(Default)]
pub struct AttestationTracker {
    tasks: Mutex<HashMap<Fingerprint, Vec<AttestationTask>>>,
}

impl AttestationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, fingerprint: Fingerprint, tasks: Vec<AttestationTask>) {
        if tasks.is_empty() {
            return;
        }
        self.lock().entry(fingerprint).or_default().extend(tasks);
    }

    pub fn tasks(&self, fingerprint: &Fingerprint) -> Vec<AttestationTask> {
        self.lock().get(fingerprint).cloned().unwrap_or_default()
    }

    /// Poll every pending task of `fingerprint`. Returns how many completed.
    /// Poll failures leave the task pending.
    pub async fn refresh<A>(&self, fingerprint: &Fingerprint, attestor: &A) -> usize
    where
        A: Attestor + ?Sized,
    {
        let pending: Vec<_> = self
            .tasks(fingerprint)
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.task_id)
            .collect();

        let mut completed = Vec::new();
        for task_id in pending {
            match attestor.get_result(&task_id).await {
                Ok(result) if result.completed => completed.push((task_id, result.result)),
                Ok(_) => {}
                Err(e) => warn!("Polling task {} failed: {:#}", hex0x(&task_id), e),
            }
        }

        if completed.is_empty() {
            return 0;
        }

        let mut guard = self.lock();
        let Some(tasks) = guard.get_mut(fingerprint) else {
            return 0;
        };

        let mut updated = 0;
        for (task_id, result) in completed {
            if let Some(task) = tasks
                .iter_mut()
                .find(|t| t.task_id == task_id && t.status == TaskStatus::Pending)
            {
                task.status = TaskStatus::Completed;
                task.result = result;
                updated += 1;
            }
        }
        debug!("{} attestation tasks completed for {}", updated, hex0x(fingerprint));
        updated
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Vec<AttestationTask>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
