//! Async task orchestration with tokio::spawn - calls business logic on Gateway.

use std::sync::Arc;

use anyhow::Result;
use kanal::AsyncReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, Instrument, Level};

use super::core::{BatchStatus, Gateway, ShutdownReport, TelemetryAck};
use crate::crypto::fingerprint;
use crate::error::PipelineError;
use crate::ingest::TelemetryReading;
use crate::pipeline::ProcessedBatch;
use crate::types::{hex0x, AttestationTask, Fingerprint, FlushTrigger, ReadyBatch};

impl Gateway {
    /// Validate a reading, add it to its batch and commit the batch inline
    /// when this reading fills it.
    ///
    /// Invalid readings are rejected before anything is inserted. A failed
    /// commit is returned; the batch is not requeued.
    pub async fn receive_telemetry(&self, reading: TelemetryReading) -> Result<TelemetryAck> {
        let sample = reading.into_sample()?;
        let fp = fingerprint(&sample.shipment_id, &sample.batch_id);
        debug!("Accepted sample for {}", hex0x(&fp));

        let processed = match self.batcher.add_sample(fp, sample) {
            Some(batch) => Some(
                self.process_ready_once(ReadyBatch {
                    fingerprint: fp,
                    batch,
                    trigger: FlushTrigger::Size,
                })
                .await?,
            ),
            None => None,
        };

        Ok(TelemetryAck {
            fingerprint: fp,
            pending_samples: self.batcher.get_batch(&fp).len(),
            processed,
        })
    }

    /// Commit one closed batch and remember its attestation tasks.
    pub async fn process_ready_once(
        &self,
        ready: ReadyBatch,
    ) -> Result<ProcessedBatch, PipelineError> {
        info!(
            "Batch {} flushed by {:?} ({} samples)",
            hex0x(&ready.fingerprint),
            ready.trigger,
            ready.batch.sample_count()
        );

        let processed = self
            .pipeline
            .process_batch(ready.fingerprint, &ready.batch)
            .await?;
        self.tracker
            .record(ready.fingerprint, processed.attestation.tasks.clone());
        Ok(processed)
    }

    pub fn batch_status(&self, fingerprint: &Fingerprint) -> BatchStatus {
        BatchStatus {
            fingerprint: *fingerprint,
            samples: self.batcher.get_batch(fingerprint),
        }
    }

    /// Tasks for `fingerprint` after polling the attestor for completions.
    pub async fn attestation_status(&self, fingerprint: &Fingerprint) -> Vec<AttestationTask> {
        self.tracker
            .refresh(fingerprint, self.pipeline.attestor().as_ref())
            .await;
        self.tracker.tasks(fingerprint)
    }

    /// Drain every active batch and commit it, including timed-out batches
    /// not yet picked up, then give the relayer a final pass.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let mut ready: Vec<ReadyBatch> = Vec::new();
        while let Ok(Some(batch)) = self.ready_rx.try_recv() {
            ready.push(batch);
        }
        ready.extend(
            self.batcher
                .flush_all()
                .into_iter()
                .map(|(fingerprint, batch)| ReadyBatch {
                    fingerprint,
                    batch,
                    trigger: FlushTrigger::Drain,
                }),
        );
        info!("Shutdown: {} batches to commit", ready.len());

        for batch in ready {
            let fp = batch.fingerprint;
            match self.process_ready_once(batch).await {
                Ok(processed) => report.processed.push(processed),
                Err(e) => {
                    error!("Failed to commit {} on shutdown: {}", hex0x(&fp), e);
                    report.failed.push((fp, e));
                }
            }
        }

        if let Some(relayer) = &self.relayer {
            report.relay = Some(relayer.drain_once().await);
        }

        report
    }

    /// Spawn the timeout-flush consumer and, in relayed mode, the relayer.
    pub fn spawn_tasks(self: &Arc<Self>) -> Vec<JoinHandle<Result<()>>> {
        let mut handles = Vec::new();

        // === Timeout task: commit batches closed by the batcher's timer ===
        handles.push({
            let gateway = Arc::clone(self);
            let ready_rx = self.ready_rx.clone();
            let mut stop = self.stop_tx.subscribe();

            tokio::spawn(
                async move {
                    info!("Timeout flush task started");

                    loop {
                        let stopped = *stop.borrow();
                        if stopped {
                            break;
                        }

                        let ready = tokio::select! {
                            biased;
                            _ = stop.changed() => break,
                            received = ready_rx.recv() => match received {
                                Ok(ready) => ready,
                                Err(_) => break,
                            },
                        };

                        if let Err(e) = gateway.process_ready_once(ready).await {
                            error!("Failed to commit timed-out batch: {}", e);
                        }
                    }

                    info!("Timeout flush task finished");
                    Ok::<(), anyhow::Error>(())
                }
                .instrument(span!(Level::INFO, "timeout_flush_task")),
            )
        });

        // === Relay task: submit queued async-channel payloads ===
        if let Some(relayer) = &self.relayer {
            let relayer = Arc::clone(relayer);
            let poll = self.config.relayer_poll_interval();
            let stop = self.stop_tx.subscribe();

            handles.push(tokio::spawn(
                async move { relayer.run(poll, stop).await }
                    .instrument(span!(Level::INFO, "relay_task")),
            ));
        }

        handles
    }

    /// Run the gateway: spawn background tasks, ingest readings until the
    /// input closes, then drain. The report lists batches committed inline
    /// and on drain; timed-out batches are only logged.
    pub async fn run(
        self: Arc<Self>,
        readings: AsyncReceiver<TelemetryReading>,
    ) -> Result<ShutdownReport> {
        let span = span!(Level::INFO, "gateway_run");
        self.run_until_closed(readings).instrument(span).await
    }

    async fn run_until_closed(
        self: Arc<Self>,
        readings: AsyncReceiver<TelemetryReading>,
    ) -> Result<ShutdownReport> {
        info!(
            "Starting gateway (batch_size={}, batch_timeout_ms={}, mode={:?})",
            self.config.batch_size, self.config.batch_timeout_ms, self.config.submission_mode
        );

        let handles = self.spawn_tasks();
        let mut committed = Vec::new();

        while let Ok(reading) = readings.recv().await {
            match self.receive_telemetry(reading).await {
                Ok(ack) => {
                    if let Some(processed) = ack.processed {
                        info!(
                            "Committed {} (root {}, nonce {})",
                            hex0x(&processed.fingerprint),
                            hex0x(&processed.merkle_root),
                            processed.nonce
                        );
                        committed.push(processed);
                    }
                }
                Err(e) => error!("Reading rejected: {:#}", e),
            }
        }
        info!("Input closed");

        self.stop_tx.send_replace(true);
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Background task failed: {:#}", e),
                Err(e) => error!("Background task panicked: {}", e),
            }
        }

        let mut report = self.shutdown().await;
        report.processed.splice(0..0, committed);
        info!(
            "Shutdown complete: {} committed, {} failed",
            report.processed.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
