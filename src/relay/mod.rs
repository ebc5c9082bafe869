//! Relayed (async channel) submission: the gateway enqueues signed payloads
//! and a relayer submits them to the registry on its own schedule.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use kanal::{AsyncReceiver, AsyncSender};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::signer::InFlightNonces;
use crate::traits::Registry;
use crate::types::{hex0x, RejectionReason, SignedSubmission};

/// Sending half handed to the pipeline.
#[derive(Clone)]
pub struct RelayQueue {
    tx: AsyncSender<SignedSubmission>,
}

impl RelayQueue {
    pub async fn enqueue(&self, submission: SignedSubmission) -> Result<(), PipelineError> {
        self.tx
            .send(submission)
            .await
            .map_err(|e| PipelineError::Relay(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

pub fn relay_channel() -> (RelayQueue, AsyncReceiver<SignedSubmission>) {
    let (tx, rx) = kanal::unbounded_async();
    (RelayQueue { tx }, rx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Accepted,
    Rejected(RejectionReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub accepted: usize,
    pub rejected: usize,
    /// Submissions that could not reach the registry. The last one is kept
    /// and retried first on the next cycle.
    pub failed: usize,
    /// Every sender is gone; nothing more will arrive.
    pub closed: bool,
}

pub struct Relayer {
    registry: Arc<dyn Registry>,
    rx: AsyncReceiver<SignedSubmission>,
    /// Held back after a registry outage.
    retry: Mutex<Option<SignedSubmission>>,
    in_flight: Option<InFlightNonces>,
}

impl Relayer {
    pub fn new(registry: Arc<dyn Registry>, rx: AsyncReceiver<SignedSubmission>) -> Self {
        Self {
            registry,
            rx,
            retry: Mutex::new(None),
            in_flight: None,
        }
    }

    /// Release the signer's nonce reservation when a message is dropped.
    pub fn with_in_flight(mut self, in_flight: InFlightNonces) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Whether a submission is waiting to be retried.
    pub fn has_retry(&self) -> bool {
        self.retry_slot().is_some()
    }

    fn retry_slot(&self) -> MutexGuard<'_, Option<SignedSubmission>> {
        self.retry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Verify the nonce is still current, then submit.
    ///
    /// A stale nonce is refused locally without spending a submission.
    pub async fn process_message(&self, submission: &SignedSubmission) -> Result<RelayOutcome> {
        let current = self
            .registry
            .get_nonce(&submission.gateway, submission.channel)
            .await?;
        if current != submission.nonce {
            warn!(
                "Relayed message for {} carries nonce {}, registry has {}",
                hex0x(&submission.payload.fingerprint),
                submission.nonce,
                current
            );
            return Ok(RelayOutcome::Rejected(RejectionReason::NonceMismatch));
        }

        let receipt = self.registry.submit(submission).await?;
        Ok(match receipt.reason {
            None if receipt.accepted => RelayOutcome::Accepted,
            Some(reason) => RelayOutcome::Rejected(reason),
            None => RelayOutcome::Rejected(RejectionReason::MalformedPayload),
        })
    }

    /// Process everything currently queued, oldest first.
    ///
    /// Rejected messages are dropped. A registry failure stops the cycle and
    /// keeps that message for the next one, so later nonces are not submitted
    /// ahead of it.
    pub async fn drain_once(&self) -> RelayStats {
        let mut stats = RelayStats::default();

        loop {
            let held = self.retry_slot().take();
            let submission = match held {
                Some(submission) => submission,
                None => match self.rx.try_recv() {
                    Ok(Some(submission)) => submission,
                    Ok(None) => break,
                    Err(_) => {
                        stats.closed = true;
                        break;
                    }
                },
            };

            match self.process_message(&submission).await {
                Ok(RelayOutcome::Accepted) => {
                    debug!(
                        "Relayed {} (nonce {})",
                        hex0x(&submission.payload.fingerprint),
                        submission.nonce
                    );
                    stats.accepted += 1;
                }
                Ok(RelayOutcome::Rejected(reason)) => {
                    warn!(
                        "Relayed submission for {} rejected: {}",
                        hex0x(&submission.payload.fingerprint),
                        reason
                    );
                    stats.rejected += 1;
                    if let Some(in_flight) = &self.in_flight {
                        in_flight.abandon(&submission.gateway, submission.channel, submission.nonce);
                    }
                }
                Err(e) => {
                    error!(
                        "Failed to relay {}, retrying next cycle: {:#}",
                        hex0x(&submission.payload.fingerprint),
                        e
                    );
                    stats.failed += 1;
                    *self.retry_slot() = Some(submission);
                    break;
                }
            }
        }

        stats
    }

    /// Poll the queue until every sender is dropped or `stop` flips.
    pub async fn run(&self, poll_interval: Duration, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Relayer started (registry={}, poll={:?})",
            self.registry.name(),
            poll_interval
        );

        loop {
            let stats = self.drain_once().await;
            if stats.accepted + stats.rejected + stats.failed > 0 {
                info!(
                    "Relay cycle: {} accepted, {} rejected, {} failed",
                    stats.accepted, stats.rejected, stats.failed
                );
            }
            let stopped = *stop.borrow();
            if stats.closed || stopped {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = stop.changed() => break,
            }
        }

        info!("Relayer finished");
        Ok(())
    }
}
