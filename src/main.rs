use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kanal::unbounded_async;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use coldchain::telemetry;
use coldchain::types::hex0x;
use coldchain::{BaseConfig, Gateway, TelemetryReading};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize telemetry
    telemetry::init();
    info!("Starting coldchain gateway");

    // Parse configuration from CLI arguments
    let config = BaseConfig::parse();
    info!(
        "Configuration: batch_size={}, batch_timeout_ms={}, mode={:?}, attestation={}",
        config.batch_size,
        config.batch_timeout_ms,
        config.submission_mode,
        config.attestation_enabled
    );

    let gateway = Arc::new(Gateway::initialize(config).await?);

    // === Input task: newline-delimited JSON readings from stdin ===
    let (reading_tx, reading_rx) = unbounded_async::<TelemetryReading>();
    let input_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match TelemetryReading::from_json(&line) {
                Ok(reading) => {
                    if reading_tx.send(reading).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Skipping line: {}", e),
            }
        }
        Ok::<(), anyhow::Error>(())
    });

    let report = gateway.run(reading_rx).await?;

    if let Err(e) = input_handle.await? {
        error!("Reading stdin failed: {:#}", e);
    }

    for processed in &report.processed {
        println!(
            "{}",
            serde_json::json!({
                "shipmentKey": hex0x(&processed.fingerprint),
                "cid": processed.content_id,
                "merkleRoot": hex0x(&processed.merkle_root),
                "nonce": processed.nonce,
                "channel": processed.channel,
                "attestationTasks": processed.attestation.tasks.len(),
            })
        );
    }
    for (fingerprint, e) in &report.failed {
        error!("Batch {} not committed: {}", hex0x(fingerprint), e);
    }

    info!("Gateway shutdown complete");
    Ok(())
}
