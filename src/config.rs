use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::batcher::{BatcherConfig, DEFAULT_BATCH_SIZE};
use crate::types::{parse_hex_array, DomainInfo, TemperatureThresholds};

pub const DEFAULT_CHAIN_ID: u64 = 421614;
pub const DEFAULT_REGISTRY_ADDRESS: &str = "0x8DfD8F3b766085ea072FB4C5EE60669e25CC915C";

/// How signed submissions reach the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    /// Gateway submits on the sync channel.
    Direct,
    /// Gateway signs on the async channel and a relayer submits.
    Relayed,
}

/// Gateway configuration, parsed from CLI flags and environment.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "coldchain", about = "Cold-chain telemetry commitment gateway")]
pub struct BaseConfig {
    /// Samples per batch before an immediate flush.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Idle timeout in milliseconds after which a partial batch is flushed.
    #[arg(long, default_value_t = 30_000)]
    pub batch_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = SubmissionMode::Direct)]
    pub submission_mode: SubmissionMode,

    /// Lowest compliant temperature, hundredths of a degree.
    #[arg(long, default_value_t = -2000, allow_hyphen_values = true)]
    pub temp_min: i64,

    /// Highest compliant temperature, hundredths of a degree.
    #[arg(long, default_value_t = 800, allow_hyphen_values = true)]
    pub temp_max: i64,

    #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    #[arg(long, default_value = DEFAULT_REGISTRY_ADDRESS)]
    pub registry_address: String,

    /// Hex secp256k1 secret. Without it every batch fails at signing.
    #[arg(long, env = "GATEWAY_PRIVATE_KEY", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub gateway_key: Option<String>,

    /// Directory for the file archive; in-memory archive when unset.
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Schedule attestation tasks after each submission.
    #[arg(long, default_value_t = false)]
    pub attestation_enabled: bool,

    #[arg(long, default_value_t = 5_000)]
    pub relayer_poll_ms: u64,
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout_ms: 30_000,
            submission_mode: SubmissionMode::Direct,
            temp_min: -2000,
            temp_max: 800,
            chain_id: DEFAULT_CHAIN_ID,
            registry_address: DEFAULT_REGISTRY_ADDRESS.to_string(),
            gateway_key: None,
            archive_dir: None,
            attestation_enabled: false,
            relayer_poll_ms: 5_000,
        }
    }
}

impl BaseConfig {
    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            batch_size: self.batch_size.max(1),
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
        }
    }

    pub fn thresholds(&self) -> TemperatureThresholds {
        TemperatureThresholds {
            min: self.temp_min,
            max: self.temp_max,
        }
    }

    pub fn domain_info(&self) -> Result<DomainInfo> {
        Ok(DomainInfo {
            chain_id: self.chain_id,
            contract_address: parse_hex_array(&self.registry_address)?,
        })
    }

    pub fn relayer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.relayer_poll_ms)
    }
}
