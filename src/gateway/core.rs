//! Core Gateway struct and initialization - no business logic.

use std::sync::Arc;

use anyhow::{Context, Result};
use kanal::{unbounded_async, AsyncReceiver};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::archive::{ArchiveVariant, FileArchive, MemoryArchive};
use crate::attestation::{AttestationTracker, AttestorVariant, DisabledAttestor, MemoryAttestor};
use crate::batcher::TelemetryBatcher;
use crate::config::{BaseConfig, SubmissionMode};
use crate::error::PipelineError;
use crate::pipeline::{CommitmentPipeline, ProcessedBatch};
use crate::registry::MemoryRegistry;
use crate::relay::{relay_channel, RelayStats, Relayer};
use crate::signer::GatewaySigner;
use crate::traits::{ArchiveStorage, Attestor, Registry};
use crate::types::{hex0x, Fingerprint, ReadyBatch, Sample};

/// Returned for every accepted reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryAck {
    pub fingerprint: Fingerprint,
    /// Samples still waiting in the active batch after this insert.
    pub pending_samples: usize,
    /// Set when this reading closed a batch by size.
    pub processed: Option<ProcessedBatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatus {
    pub fingerprint: Fingerprint,
    pub samples: Vec<Sample>,
}

impl BatchStatus {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub processed: Vec<ProcessedBatch>,
    pub failed: Vec<(Fingerprint, PipelineError)>,
    pub relay: Option<RelayStats>,
}

/// Main gateway: batcher in front of the commitment pipeline.
pub struct Gateway {
    pub config: BaseConfig,

    pub batcher: TelemetryBatcher,

    pub pipeline: CommitmentPipeline,

    pub tracker: AttestationTracker,

    /// Present in relayed mode.
    pub relayer: Option<Arc<Relayer>>,

    /// Batches closed by the batcher's timeout.
    pub(crate) ready_rx: AsyncReceiver<ReadyBatch>,

    /// Flipped once to stop the background tasks.
    pub(crate) stop_tx: watch::Sender<bool>,
}

impl Gateway {
    pub fn new(
        config: BaseConfig,
        archive: Arc<dyn ArchiveStorage>,
        registry: Arc<dyn Registry>,
        attestor: Arc<dyn Attestor>,
        signer: GatewaySigner,
    ) -> Self {
        let (ready_tx, ready_rx) = unbounded_async::<ReadyBatch>();
        let batcher = TelemetryBatcher::with_ready_channel(config.batcher_config(), ready_tx);

        let mut pipeline = CommitmentPipeline::new(archive, Arc::clone(&registry), attestor, signer)
            .with_thresholds(config.thresholds());

        let relayer = match config.submission_mode {
            SubmissionMode::Direct => None,
            SubmissionMode::Relayed => {
                let (queue, rx) = relay_channel();
                pipeline = pipeline.with_relay(queue);
                let in_flight = pipeline.coordinator().in_flight();
                Some(Arc::new(Relayer::new(registry, rx).with_in_flight(in_flight)))
            }
        };

        let (stop_tx, _) = watch::channel(false);

        Self {
            config,
            batcher,
            pipeline,
            tracker: AttestationTracker::new(),
            relayer,
            ready_rx,
            stop_tx,
        }
    }

    /// Build a gateway from configuration with the bundled collaborators:
    /// file or in-memory archive, the in-memory registry (with this gateway
    /// authorized) and the in-memory or disabled attestor.
    pub async fn initialize(config: BaseConfig) -> Result<Self> {
        let signer = match &config.gateway_key {
            Some(key) => GatewaySigner::from_secret_hex(key).context("loading gateway key")?,
            None => {
                warn!("No gateway key configured; batches will fail at signing");
                GatewaySigner::unavailable()
            }
        };

        let mut archive = match &config.archive_dir {
            Some(dir) => ArchiveVariant::File(FileArchive::new(dir.clone())),
            None => ArchiveVariant::Memory(MemoryArchive::new()),
        };
        archive.open().await?;
        info!("Archive: {}", archive.name());

        let registry = MemoryRegistry::new(config.domain_info().context("registry address")?);
        if let Ok(address) = signer.address() {
            registry.authorize_gateway(address);
            info!("Gateway identity: {}", hex0x(&address));
        }
        info!(
            "Registry: {} (chain {}, contract {})",
            registry.name(),
            config.chain_id,
            config.registry_address
        );

        let archive: Arc<dyn ArchiveStorage> = Arc::new(archive);
        let attestor = if config.attestation_enabled {
            AttestorVariant::Memory(MemoryAttestor::new().with_archive(Arc::clone(&archive)))
        } else {
            AttestorVariant::Disabled(DisabledAttestor)
        };
        info!("Attestor: {}", attestor.name());

        Ok(Self::new(
            config,
            archive,
            Arc::new(registry),
            Arc::new(attestor),
            signer,
        ))
    }
}
