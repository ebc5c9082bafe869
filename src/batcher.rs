//! Per-fingerprint sample accumulator with size and timeout closing.
//!
//! All state lives behind one mutex, and every insert/flush decision runs to
//! completion while holding it. Each active batch carries a generation number;
//! a timeout task only flushes the batch it was armed for, so a size flush
//! racing a timer fire yields exactly one flush.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kanal::AsyncSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{hex0x, Batch, Fingerprint, FlushTrigger, ReadyBatch, Sample};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Samples per batch before an immediate flush.
    pub batch_size: usize,
    /// Idle deadline measured from the first sample of a batch.
    pub batch_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

struct ActiveBatch {
    samples: Vec<Sample>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct BatchState {
    batches: HashMap<Fingerprint, ActiveBatch>,
    next_generation: u64,
}

pub struct TelemetryBatcher {
    config: BatcherConfig,
    state: Arc<Mutex<BatchState>>,
    /// Receives batches closed by the timeout task.
    ready_tx: Option<AsyncSender<ReadyBatch>>,
}

impl TelemetryBatcher {
    /// A batcher whose timeout flushes are dropped after removal. Use
    /// [`TelemetryBatcher::with_ready_channel`] to have them processed.
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BatchState::default())),
            ready_tx: None,
        }
    }

    pub fn with_ready_channel(config: BatcherConfig, ready_tx: AsyncSender<ReadyBatch>) -> Self {
        Self {
            ready_tx: Some(ready_tx),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> BatcherConfig {
        self.config
    }

    /// Stamp, append, and flush when the size threshold is reached.
    ///
    /// The first sample for a fingerprint arms the timeout. Arming needs a
    /// tokio runtime; outside one the batch only closes by size or drain.
    pub fn add_sample(&self, fingerprint: Fingerprint, mut sample: Sample) -> Option<Batch> {
        sample.timestamp = now_millis();

        let mut state = lock(&self.state);

        if !state.batches.contains_key(&fingerprint) {
            let generation = state.next_generation;
            state.next_generation += 1;
            let timer = self.arm_timer(fingerprint, generation);
            state.batches.insert(
                fingerprint,
                ActiveBatch {
                    samples: Vec::with_capacity(self.config.batch_size),
                    generation,
                    timer,
                },
            );
            debug!("Opened batch for {}", hex0x(&fingerprint));
        }

        let len = match state.batches.get_mut(&fingerprint) {
            Some(active) => {
                active.samples.push(sample);
                active.samples.len()
            }
            None => return None,
        };

        if len >= self.config.batch_size {
            let batch = take_batch(&mut state, &fingerprint);
            if let Some(batch) = &batch {
                debug!(
                    "Size flush for {} ({} samples)",
                    hex0x(&fingerprint),
                    batch.sample_count()
                );
            }
            return batch;
        }

        None
    }

    /// Remove and return the active batch. `None` if there is none.
    pub fn flush_batch(&self, fingerprint: &Fingerprint) -> Option<Batch> {
        let mut state = lock(&self.state);
        take_batch(&mut state, fingerprint)
    }

    /// Drain every active batch, used on shutdown.
    pub fn flush_all(&self) -> Vec<(Fingerprint, Batch)> {
        let mut state = lock(&self.state);
        let keys: Vec<Fingerprint> = state.batches.keys().copied().collect();
        keys.into_iter()
            .filter_map(|fp| take_batch(&mut state, &fp).map(|batch| (fp, batch)))
            .collect()
    }

    /// Snapshot of the active batch without flushing it.
    pub fn get_batch(&self, fingerprint: &Fingerprint) -> Vec<Sample> {
        lock(&self.state)
            .batches
            .get(fingerprint)
            .map(|active| active.samples.clone())
            .unwrap_or_default()
    }

    pub fn active_batches(&self) -> usize {
        lock(&self.state).batches.len()
    }

    fn arm_timer(&self, fingerprint: Fingerprint, generation: u64) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime; batch timeout disabled for {}", hex0x(&fingerprint));
                return None;
            }
        };

        let state = Arc::clone(&self.state);
        let ready_tx = self.ready_tx.clone();
        let timeout = self.config.batch_timeout;

        Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;

            let batch = {
                let mut state = lock(&state);
                match state.batches.get(&fingerprint) {
                    // Removing drops our own handle; aborting it here would
                    // cancel this task before the batch is handed off.
                    Some(active) if active.generation == generation => state
                        .batches
                        .remove(&fingerprint)
                        .and_then(|active| Batch::new(active.samples)),
                    // Already flushed by size or drain.
                    _ => None,
                }
            };

            let Some(batch) = batch else {
                return;
            };

            debug!(
                "Timeout flush for {} ({} samples)",
                hex0x(&fingerprint),
                batch.sample_count()
            );

            match ready_tx {
                Some(tx) => {
                    let ready = ReadyBatch {
                        fingerprint,
                        batch,
                        trigger: FlushTrigger::Timeout,
                    };
                    if let Err(e) = tx.send(ready).await {
                        warn!("Dropping timed-out batch, ready channel closed: {}", e);
                    }
                }
                None => warn!(
                    "Timed-out batch for {} discarded: no ready channel",
                    hex0x(&fingerprint)
                ),
            }
        }))
    }
}

/// Remove the entry, cancel its timer, and wrap non-empty samples.
fn take_batch(state: &mut BatchState, fingerprint: &Fingerprint) -> Option<Batch> {
    let mut active = state.batches.remove(fingerprint)?;
    if let Some(timer) = active.timer.take() {
        timer.abort();
    }
    Batch::new(active.samples)
}

fn lock(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
