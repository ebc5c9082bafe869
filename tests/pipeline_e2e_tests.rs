use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sha3::{Digest, Keccak256};

use coldchain::archive::MemoryArchive;
use coldchain::attestation::{
    AttestationRequest, AttestorVariant, DisabledAttestor, IntegrityVerifier, MemoryAttestor,
};
use coldchain::batcher::{BatcherConfig, TelemetryBatcher};
use coldchain::crypto::{compute_root, fingerprint, generate_proof, verify};
use coldchain::relay::{relay_channel, RelayOutcome, Relayer};
use coldchain::signer::{eip712, recover_signer};
use coldchain::traits::{ArchiveStorage, Registry};
use coldchain::types::{
    hex0x, Address, AttestationType, Batch, Channel, DomainInfo, Fingerprint, RejectionReason,
    Sample, SignedSubmission, SubmissionReceipt, TelemetryRecord, TemperatureThresholds,
};
use coldchain::{
    CommitmentPipeline, GatewaySigner, MemoryRegistry, PipelineError, SubmissionOutcome,
};

// ===== Test Helper Functions =====

struct Setup {
    archive: MemoryArchive,
    registry: MemoryRegistry,
    attestor: MemoryAttestor,
    signer: GatewaySigner,
}

fn domain() -> DomainInfo {
    DomainInfo {
        chain_id: 421614,
        contract_address: coldchain::types::parse_hex_array(
            "0x8DfD8F3b766085ea072FB4C5EE60669e25CC915C",
        )
        .unwrap(),
    }
}

fn setup() -> Setup {
    let signer = GatewaySigner::from_secret_hex(
        "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
    )
    .unwrap();
    let registry = MemoryRegistry::new(domain());
    registry.authorize_gateway(signer.address().unwrap());
    Setup {
        archive: MemoryArchive::new(),
        registry,
        attestor: MemoryAttestor::new(),
        signer,
    }
}

fn pipeline(s: &Setup) -> CommitmentPipeline {
    CommitmentPipeline::new(
        Arc::new(s.archive.clone()),
        Arc::new(s.registry.clone()),
        Arc::new(s.attestor.clone()),
        s.signer.clone(),
    )
}

fn scenario_samples() -> Vec<Sample> {
    vec![
        Sample::new("SHIP-E2E", "BATCH-1", 2500, 6500).with_tag("RFID-A"),
        Sample::new("SHIP-E2E", "BATCH-1", 2600, 7000).with_tag("RFID-A"),
        Sample::new("SHIP-E2E", "BATCH-1", 2700, 7200).with_tag("RFID-A"),
    ]
}

/// Registry that is slow to answer nonce reads and can replay stale ones.
#[derive(Clone)]
struct LaggingRegistry {
    inner: MemoryRegistry,
    delay: Duration,
    stale: Arc<Mutex<Vec<u64>>>,
}

impl LaggingRegistry {
    fn new(inner: MemoryRegistry, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            stale: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer the next nonce reads with these values, in order.
    fn serve_stale(&self, nonces: &[u64]) {
        let mut stale = self.stale.lock().unwrap();
        stale.extend(nonces.iter().rev());
    }
}

#[async_trait]
impl Registry for LaggingRegistry {
    fn name(&self) -> &'static str {
        "lagging"
    }

    async fn get_nonce(&self, identity: &Address, channel: Channel) -> Result<u64> {
        tokio::time::sleep(self.delay).await;
        let stale = self.stale.lock().unwrap().pop();
        match stale {
            Some(nonce) => Ok(nonce),
            None => self.inner.get_nonce(identity, channel).await,
        }
    }

    async fn get_domain_info(&self) -> Result<DomainInfo> {
        self.inner.get_domain_info().await
    }

    async fn submit(&self, submission: &SignedSubmission) -> Result<SubmissionReceipt> {
        self.inner.submit(submission).await
    }

    async fn get_record(&self, fingerprint: &Fingerprint) -> Result<Option<TelemetryRecord>> {
        self.inner.get_record(fingerprint).await
    }
}

fn lagging_pipeline(s: &Setup, registry: &LaggingRegistry) -> CommitmentPipeline {
    CommitmentPipeline::new(
        Arc::new(s.archive.clone()),
        Arc::new(registry.clone()),
        Arc::new(s.attestor.clone()),
        s.signer.clone(),
    )
}

/// Independent leaf: sorted-key JSON built by hand, keccak256.
fn manual_leaf(sample: &Sample) -> [u8; 32] {
    let json = format!(
        r#"{{"batchId":"{}","humidity":{},"rfidTag":"{}","shipmentId":"{}","temperature":{},"timestamp":{}}}"#,
        sample.batch_id,
        sample.humidity,
        sample.tag.as_deref().unwrap_or_default(),
        sample.shipment_id,
        sample.temperature,
        sample.timestamp
    );
    Keccak256::digest(json.as_bytes()).into()
}

fn manual_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut h = Keccak256::new();
    h.update(lo);
    h.update(hi);
    h.finalize().into()
}

// ===== End-to-end Scenario =====

#[tokio::test]
async fn test_three_sample_scenario_root_is_reproducible() -> Result<()> {
    let batcher = TelemetryBatcher::new(BatcherConfig {
        batch_size: 3,
        ..Default::default()
    });
    let fp = fingerprint("SHIP-E2E", "BATCH-1");

    let mut flushed = None;
    for s in scenario_samples() {
        flushed = batcher.add_sample(fp, s);
    }
    let batch = flushed.expect("batch of three flushes");
    let temps: Vec<i64> = batch.samples().iter().map(|s| s.temperature).collect();
    assert_eq!(temps, vec![2500, 2600, 2700]);

    let root = compute_root(batch.samples())?;
    let root_hex = hex0x(&root);
    assert_eq!(root_hex.len(), 66);
    assert!(root_hex.starts_with("0x"));

    let leaves: Vec<[u8; 32]> = batch.samples().iter().map(manual_leaf).collect();
    let expected = manual_pair(&manual_pair(&leaves[0], &leaves[1]), &leaves[2]);
    assert_eq!(root, expected);

    for (i, sample) in batch.samples().iter().enumerate() {
        let proof = generate_proof(batch.samples(), i)?.unwrap();
        assert!(verify(sample, &root, &proof)?);
    }

    // commit it
    let s = setup();
    let processed = pipeline(&s).process_batch(fp, &batch).await?;
    assert_eq!(processed.merkle_root, root);
    assert_eq!(processed.submission, SubmissionOutcome::Committed);

    let record = s.registry.get_record(&fp).await?.unwrap();
    assert_eq!(record.temperature, 2600);
    assert_eq!(record.humidity, 6900);
    assert_eq!(record.tag, "RFID-A");
    assert_eq!(record.merkle_root, root);

    // the archived bytes are the batch
    let archived = s.archive.get(&processed.content_id).await?.unwrap();
    assert!(archived.len() >= 127);
    let decoded: Vec<Sample> = serde_json::from_slice(&archived)?;
    assert_eq!(compute_root(&decoded)?, root);
    Ok(())
}

// ===== Nonce / Replay =====

#[tokio::test]
async fn test_nonce_monotonicity_and_replay() -> Result<()> {
    let s = setup();
    let p = pipeline(&s);
    let gw = s.signer.address()?;
    let batch = Batch::new(scenario_samples()).unwrap();
    let fp = fingerprint("SHIP-E2E", "BATCH-1");

    let first = p.process_batch(fp, &batch).await?;
    assert_eq!(first.nonce, 0);
    assert_eq!(s.registry.get_nonce(&gw, Channel::Sync).await?, 1);

    // replay the exact signed tuple with nonce 0
    let payload = coldchain::types::TelemetryPayload {
        fingerprint: fp,
        merkle_root: first.merkle_root,
        content_id: first.content_id.clone(),
        temperature: 2600,
        humidity: 6900,
        tag: "RFID-A".into(),
    };
    let signature = s.signer.sign(&domain(), &payload, 0, Channel::Sync)?;
    let replay = coldchain::types::SignedSubmission {
        payload,
        nonce: 0,
        channel: Channel::Sync,
        signature,
        gateway: gw,
    };
    let receipt = s.registry.submit(&replay).await?;
    assert!(!receipt.accepted);
    assert_eq!(receipt.reason, Some(RejectionReason::NonceMismatch));

    // the pipeline re-reads the nonce, so the next batch uses 1
    let second = p.process_batch(fp, &batch).await?;
    assert_eq!(second.nonce, 1);
    assert_eq!(s.registry.get_nonce(&gw, Channel::Sync).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_channel_independence() -> Result<()> {
    let s = setup();
    let gw = s.signer.address()?;
    let batch = Batch::new(scenario_samples()).unwrap();

    pipeline(&s)
        .process_batch(fingerprint("A", "1"), &batch)
        .await?;
    assert_eq!(s.registry.get_nonce(&gw, Channel::Sync).await?, 1);
    assert_eq!(s.registry.get_nonce(&gw, Channel::Async).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_signature_recovers_gateway_under_registry_domain() -> Result<()> {
    let s = setup();
    let payload = coldchain::types::TelemetryPayload {
        fingerprint: [1u8; 32],
        merkle_root: [2u8; 32],
        content_id: "sha256-x".into(),
        temperature: -100,
        humidity: 5000,
        tag: String::new(),
    };
    let sig = s.signer.sign(&domain(), &payload, 7, Channel::Async)?;
    let digest = eip712::signing_digest(&domain(), &payload, 7, Channel::Async);
    assert_eq!(recover_signer(&digest, &sig), Some(s.signer.address()?));

    // a different deployment does not recover the gateway
    let other = DomainInfo {
        chain_id: 1,
        ..domain()
    };
    let foreign = eip712::signing_digest(&other, &payload, 7, Channel::Async);
    assert_ne!(recover_signer(&foreign, &sig), Some(s.signer.address()?));
    Ok(())
}

// ===== Failure Handling =====

#[tokio::test]
async fn test_archive_failure_aborts_before_registry() -> Result<()> {
    let s = setup();
    s.archive.set_unavailable(true);
    let batch = Batch::new(scenario_samples()).unwrap();

    let err = pipeline(&s)
        .process_batch(fingerprint("A", "1"), &batch)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Archive(_)));
    assert!(!err.is_retryable_after_refetch());
    assert_eq!(s.registry.record_count(), 0);
    assert_eq!(s.attestor.task_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_gateway_is_rejected() -> Result<()> {
    let s = setup();
    s.registry.revoke_gateway(&s.signer.address()?);
    let batch = Batch::new(scenario_samples()).unwrap();

    let err = pipeline(&s)
        .process_batch(fingerprint("A", "1"), &batch)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Rejected(RejectionReason::UnauthorizedSigner)
    ));
    assert!(!err.is_retryable_after_refetch());
    Ok(())
}

#[tokio::test]
async fn test_registry_unavailable_and_missing_key() -> Result<()> {
    let s = setup();
    let batch = Batch::new(scenario_samples()).unwrap();

    s.registry.set_unavailable(true);
    let err = pipeline(&s)
        .process_batch(fingerprint("A", "1"), &batch)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Coordinator(coldchain::CoordinatorError::RegistryUnavailable(_))
    ));
    s.registry.set_unavailable(false);

    let keyless = CommitmentPipeline::new(
        Arc::new(s.archive.clone()),
        Arc::new(s.registry.clone()),
        Arc::new(s.attestor.clone()),
        GatewaySigner::unavailable(),
    );
    let err = keyless
        .process_batch(fingerprint("A", "1"), &batch)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Coordinator(coldchain::CoordinatorError::SigningUnavailable)
    ));
    Ok(())
}

#[tokio::test]
async fn test_attestation_failures_are_partial_success() -> Result<()> {
    let s = setup();
    s.attestor.fail_on(AttestationType::ArchiveVerified);
    s.attestor.fail_on(AttestationType::FullIntegrity);
    let batch = Batch::new(scenario_samples()).unwrap();

    let processed = pipeline(&s)
        .process_batch(fingerprint("A", "1"), &batch)
        .await?;
    assert_eq!(processed.submission, SubmissionOutcome::Committed);
    assert_eq!(processed.attestation.tasks.len(), 3);
    let failed: Vec<AttestationType> =
        processed.attestation.failures.iter().map(|(k, _)| *k).collect();
    assert_eq!(
        failed,
        vec![AttestationType::ArchiveVerified, AttestationType::FullIntegrity]
    );
    assert!(!processed.attestation.is_complete());

    // disabled network: all five fail, commitment still stands
    let disabled = CommitmentPipeline::new(
        Arc::new(s.archive.clone()),
        Arc::new(s.registry.clone()),
        Arc::new(AttestorVariant::Disabled(DisabledAttestor)),
        s.signer.clone(),
    );
    let processed = disabled
        .process_batch(fingerprint("B", "1"), &batch)
        .await?;
    assert_eq!(processed.attestation.failures.len(), 5);
    assert!(s.registry.get_record(&fingerprint("B", "1")).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_attested_batch_passes_integrity_checks() -> Result<()> {
    let s = setup();
    let batch = Batch::new(scenario_samples()).unwrap();
    let fp = fingerprint("A", "1");
    let processed = pipeline(&s).process_batch(fp, &batch).await?;

    let request = AttestationRequest {
        content_id: processed.content_id.clone(),
        merkle_root: processed.merkle_root,
        fingerprint: fp,
        temperature: 2600,
        humidity: 6900,
        thresholds: TemperatureThresholds::default(),
    };
    let verifier = IntegrityVerifier::new(&s.archive);

    // 25-27 degrees breaks the cold chain; everything else holds
    for task in &processed.attestation.tasks {
        let outcome = verifier.verify(task.kind, &request).await;
        let expected = !matches!(
            task.kind,
            AttestationType::ThresholdCompliance | AttestationType::FullIntegrity
        );
        assert_eq!(outcome.valid, expected, "{}", task.kind);
        s.attestor
            .complete(&task.task_id, if outcome.valid { "1" } else { "0" })?;
    }
    Ok(())
}

// ===== Relayed Submission =====

#[tokio::test]
async fn test_relayed_submission_and_stale_nonce() -> Result<()> {
    let s = setup();
    let (queue, rx) = relay_channel();
    let relayed = pipeline(&s).with_relay(queue.clone());
    let relayer = Relayer::new(Arc::new(s.registry.clone()), rx)
        .with_in_flight(relayed.coordinator().in_flight());
    let batch = Batch::new(scenario_samples()).unwrap();

    let a = relayed.process_batch(fingerprint("A", "1"), &batch).await?;
    let b = relayed.process_batch(fingerprint("B", "1"), &batch).await?;
    assert_eq!(a.submission, SubmissionOutcome::Queued);
    // nothing relayed yet, the second message takes the next async nonce
    assert_eq!((a.nonce, b.nonce), (0, 1));
    assert_eq!(queue.len(), 2);

    let stats = relayer.drain_once().await;
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.rejected, 0);
    assert!(!stats.closed);
    assert!(s.registry.get_record(&fingerprint("A", "1")).await?.is_some());
    assert!(s.registry.get_record(&fingerprint("B", "1")).await?.is_some());

    // registry has caught up; signing continues from its counter
    let c = relayed.process_batch(fingerprint("C", "1"), &batch).await?;
    assert_eq!(c.nonce, 2);
    let stats = relayer.drain_once().await;
    assert_eq!(stats.accepted, 1);

    let gw = s.signer.address()?;
    let outcome = relayer
        .process_message(&coldchain::types::SignedSubmission {
            payload: coldchain::types::TelemetryPayload {
                fingerprint: [9u8; 32],
                merkle_root: [9u8; 32],
                content_id: "sha256-9".into(),
                temperature: 0,
                humidity: 0,
                tag: String::new(),
            },
            nonce: 0,
            channel: Channel::Async,
            signature: s.signer.sign_digest(&[0u8; 32])?,
            gateway: gw,
        })
        .await?;
    assert_eq!(outcome, RelayOutcome::Rejected(RejectionReason::NonceMismatch));
    Ok(())
}

#[tokio::test]
async fn test_rejected_relay_messages_release_their_nonces() -> Result<()> {
    let s = setup();
    let gw = s.signer.address()?;
    let (queue, rx) = relay_channel();
    let relayed = pipeline(&s).with_relay(queue);
    let relayer = Relayer::new(Arc::new(s.registry.clone()), rx)
        .with_in_flight(relayed.coordinator().in_flight());
    let batch = Batch::new(scenario_samples()).unwrap();

    s.registry.revoke_gateway(&gw);
    let a = relayed.process_batch(fingerprint("A", "1"), &batch).await?;
    let b = relayed.process_batch(fingerprint("B", "1"), &batch).await?;
    assert_eq!((a.nonce, b.nonce), (0, 1));

    let stats = relayer.drain_once().await;
    assert_eq!(stats.rejected, 2);
    assert_eq!(relayed.coordinator().in_flight().pending(&gw, Channel::Async), None);

    // back to the registry counter once the queue is spent
    s.registry.authorize_gateway(gw);
    let c = relayed.process_batch(fingerprint("C", "1"), &batch).await?;
    assert_eq!(c.nonce, 0);
    let stats = relayer.drain_once().await;
    assert_eq!(stats.accepted, 1);
    assert!(s.registry.get_record(&fingerprint("C", "1")).await?.is_some());
    Ok(())
}

// ===== Concurrent Commits =====

#[tokio::test]
async fn test_concurrent_batches_take_consecutive_nonces() -> Result<()> {
    let s = setup();
    let gw = s.signer.address()?;
    let registry = LaggingRegistry::new(s.registry.clone(), Duration::from_millis(10));
    let p = lagging_pipeline(&s, &registry);
    let batch = Batch::new(scenario_samples()).unwrap();

    let (a, b) = tokio::join!(
        p.process_batch(fingerprint("A", "1"), &batch),
        p.process_batch(fingerprint("B", "1"), &batch),
    );
    let (a, b) = (a?, b?);

    let mut nonces = vec![a.nonce, b.nonce];
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1]);
    assert_eq!(s.registry.record_count(), 2);
    assert_eq!(s.registry.get_nonce(&gw, Channel::Sync).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_stale_nonce_is_refetched_and_resigned() -> Result<()> {
    let s = setup();
    let registry = LaggingRegistry::new(s.registry.clone(), Duration::ZERO);
    let p = lagging_pipeline(&s, &registry);
    let batch = Batch::new(scenario_samples()).unwrap();

    p.process_batch(fingerprint("A", "1"), &batch).await?;

    // another writer consumed nonce 0 but the read lags behind
    registry.serve_stale(&[0]);
    let second = p.process_batch(fingerprint("B", "1"), &batch).await?;
    assert_eq!(second.nonce, 1);
    assert_eq!(second.submission, SubmissionOutcome::Committed);
    assert!(s.registry.get_record(&fingerprint("B", "1")).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_persistent_nonce_mismatch_gives_up() -> Result<()> {
    let s = setup();
    let registry = LaggingRegistry::new(s.registry.clone(), Duration::ZERO);
    let p = lagging_pipeline(&s, &registry);
    let batch = Batch::new(scenario_samples()).unwrap();

    p.process_batch(fingerprint("A", "1"), &batch).await?;

    registry.serve_stale(&[0; coldchain::pipeline::MAX_SUBMIT_ATTEMPTS]);
    let err = p
        .process_batch(fingerprint("B", "1"), &batch)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Rejected(RejectionReason::NonceMismatch)
    ));
    assert!(s.registry.get_record(&fingerprint("B", "1")).await?.is_none());
    Ok(())
}
