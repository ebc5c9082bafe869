//! Batch commitment: archive, Merkle root, sign, submit, attest.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::archive::pad_payload;
use crate::attestation::{encode_task_payload, AttestationRequest};
use crate::batcher::now_millis;
use crate::crypto::compute_root;
use crate::error::{ArchiveError, PipelineError};
use crate::relay::RelayQueue;
use crate::signer::{GatewaySigner, NonceCoordinator};
use crate::traits::{ArchiveStorage, Attestor, Registry};
use crate::types::{
    hex0x, AttestationTask, AttestationType, Batch, Channel, ContentId, Fingerprint, MerkleRoot,
    RejectionReason, Sample, TaskStatus, TelemetryPayload, TemperatureThresholds,
};

/// Signing attempts per batch when the registry reports the nonce as
/// already consumed.
pub const MAX_SUBMIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Accepted by the registry.
    Committed,
    /// Handed to the relay queue; not yet on the registry.
    Queued,
}

/// Attestation fan-out result. Failures never fail the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestationReport {
    pub tasks: Vec<AttestationTask>,
    pub failures: Vec<(AttestationType, String)>,
}

impl AttestationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.tasks.len() == AttestationType::ALL.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBatch {
    pub fingerprint: Fingerprint,
    pub content_id: ContentId,
    pub merkle_root: MerkleRoot,
    pub nonce: u64,
    pub channel: Channel,
    pub submission: SubmissionOutcome,
    pub attestation: AttestationReport,
}

pub struct CommitmentPipeline {
    archive: Arc<dyn ArchiveStorage>,
    registry: Arc<dyn Registry>,
    attestor: Arc<dyn Attestor>,
    coordinator: NonceCoordinator,
    relay: Option<RelayQueue>,
    thresholds: TemperatureThresholds,
    /// Held from the nonce read until the submission is on the registry or
    /// in the relay queue. One pipeline signs on a single channel.
    commit_lock: Mutex<()>,
}

impl CommitmentPipeline {
    pub fn new(
        archive: Arc<dyn ArchiveStorage>,
        registry: Arc<dyn Registry>,
        attestor: Arc<dyn Attestor>,
        signer: GatewaySigner,
    ) -> Self {
        Self {
            coordinator: NonceCoordinator::new(Arc::clone(&registry), signer),
            archive,
            registry,
            attestor,
            relay: None,
            thresholds: TemperatureThresholds::default(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Sign on the async channel and enqueue instead of submitting.
    pub fn with_relay(mut self, relay: RelayQueue) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_thresholds(mut self, thresholds: TemperatureThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn channel(&self) -> Channel {
        if self.relay.is_some() {
            Channel::Async
        } else {
            Channel::Sync
        }
    }

    pub fn coordinator(&self) -> &NonceCoordinator {
        &self.coordinator
    }

    pub fn archive(&self) -> &Arc<dyn ArchiveStorage> {
        &self.archive
    }

    pub fn attestor(&self) -> &Arc<dyn Attestor> {
        &self.attestor
    }

    /// Commit one flushed batch.
    ///
    /// Archive and registry failures abort and are returned. A registry
    /// nonce mismatch is re-signed against a fresh nonce a bounded number of
    /// times. Attestation failures are only reported.
    pub async fn process_batch(
        &self,
        fingerprint: Fingerprint,
        batch: &Batch,
    ) -> Result<ProcessedBatch, PipelineError> {
        info!(
            "Processing batch {} ({} samples)",
            hex0x(&fingerprint),
            batch.sample_count()
        );

        let content_id = self.archive_batch(batch).await?;
        info!("Archived batch {} as {}", hex0x(&fingerprint), content_id);

        // the in-memory batch, not a re-fetch from the archive
        let merkle_root = compute_root(batch.samples())?;
        debug!("Merkle root {}", hex0x(&merkle_root));

        let payload = TelemetryPayload {
            fingerprint,
            merkle_root,
            content_id: content_id.clone(),
            temperature: average_temperature(batch.samples()),
            humidity: average_humidity(batch.samples()),
            tag: batch.first().tag.clone().unwrap_or_default(),
        };

        let channel = self.channel();
        let (nonce, outcome) = {
            let _commit = self.commit_lock.lock().await;
            self.sign_and_submit(&fingerprint, &payload, channel).await?
        };

        let request = AttestationRequest {
            content_id: content_id.clone(),
            merkle_root,
            fingerprint,
            temperature: payload.temperature,
            humidity: payload.humidity,
            thresholds: self.thresholds,
        };
        let attestation = self.fan_out_attestations(&request).await;

        Ok(ProcessedBatch {
            fingerprint,
            content_id,
            merkle_root,
            nonce,
            channel,
            submission: outcome,
            attestation,
        })
    }

    /// Authorize against the current nonce and submit or enqueue. A nonce
    /// consumed by another writer is re-fetched and re-signed, up to
    /// [`MAX_SUBMIT_ATTEMPTS`] times. Callers hold `commit_lock`.
    async fn sign_and_submit(
        &self,
        fingerprint: &Fingerprint,
        payload: &TelemetryPayload,
        channel: Channel,
    ) -> Result<(u64, SubmissionOutcome), PipelineError> {
        let mut attempt = 1;

        loop {
            let submission = self.coordinator.authorize(payload.clone(), channel).await?;
            let nonce = submission.nonce;
            info!("Signed {} with {} nonce {}", hex0x(fingerprint), channel, nonce);

            if let Some(relay) = &self.relay {
                let gateway = submission.gateway;
                relay.enqueue(submission).await?;
                self.coordinator.mark_queued(&gateway, channel, nonce);
                info!("Queued {} for relay", hex0x(fingerprint));
                return Ok((nonce, SubmissionOutcome::Queued));
            }

            let receipt = self
                .registry
                .submit(&submission)
                .await
                .map_err(|e| PipelineError::Registry(format!("{:#}", e)))?;
            if receipt.accepted {
                info!("Committed {} on {}", hex0x(fingerprint), self.registry.name());
                return Ok((nonce, SubmissionOutcome::Committed));
            }

            let reason = receipt.reason.unwrap_or(RejectionReason::MalformedPayload);
            let err = PipelineError::Rejected(reason);
            if err.is_retryable_after_refetch() && attempt < MAX_SUBMIT_ATTEMPTS {
                warn!(
                    "Nonce {} for {} consumed elsewhere, re-fetching (attempt {}/{})",
                    nonce,
                    hex0x(fingerprint),
                    attempt + 1,
                    MAX_SUBMIT_ATTEMPTS
                );
                attempt += 1;
                continue;
            }

            warn!("Registry rejected {}: {}", hex0x(fingerprint), reason);
            return Err(err);
        }
    }

    async fn archive_batch(&self, batch: &Batch) -> Result<ContentId, PipelineError> {
        let bytes = serde_json::to_vec(batch.samples())
            .map_err(|e| PipelineError::Archive(format!("serializing batch: {}", e)))?;
        let bytes = pad_payload(bytes, self.archive.min_payload_size());

        self.archive.put(&bytes).await.map_err(|e| {
            match e.downcast_ref::<ArchiveError>() {
                Some(too_small @ ArchiveError::PayloadTooSmall { .. }) => {
                    PipelineError::PayloadTooSmall(too_small.clone())
                }
                _ => PipelineError::Archive(format!("{:#}", e)),
            }
        })
    }

    /// One task per attestation type.
    pub async fn fan_out_attestations(&self, request: &AttestationRequest) -> AttestationReport {
        let mut report = AttestationReport::default();

        for kind in AttestationType::ALL {
            let payload = encode_task_payload(kind, request);
            match self.attestor.submit_task(kind, &payload).await {
                Ok(task_id) => report.tasks.push(AttestationTask {
                    task_id,
                    kind,
                    status: TaskStatus::Pending,
                    result: None,
                    created_at: now_millis(),
                }),
                Err(e) => {
                    warn!(
                        "Attestation {} for {} not scheduled: {:#}",
                        kind,
                        hex0x(&request.fingerprint),
                        e
                    );
                    report.failures.push((kind, format!("{:#}", e)));
                }
            }
        }

        info!(
            "Attestation fan-out for {}: {} scheduled, {} failed",
            hex0x(&request.fingerprint),
            report.tasks.len(),
            report.failures.len()
        );
        report
    }
}

/// Mean rounded half up, the way the registry's consumers round.
fn rounded_mean(sum: i128, count: i128) -> i128 {
    (2 * sum + count).div_euclid(2 * count)
}

pub fn average_temperature(samples: &[Sample]) -> i64 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i128 = samples.iter().map(|s| i128::from(s.temperature)).sum();
    rounded_mean(sum, samples.len() as i128) as i64
}

pub fn average_humidity(samples: &[Sample]) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i128 = samples.iter().map(|s| i128::from(s.humidity)).sum();
    rounded_mean(sum, samples.len() as i128) as u64
}
