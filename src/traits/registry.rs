use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    Address, Channel, DomainInfo, Fingerprint, SignedSubmission, SubmissionReceipt,
    TelemetryRecord,
};

/// On-chain shipment registry.
///
/// Owns the per-identity nonce counters; the gateway never assumes it is the
/// only writer and re-reads before every signature.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Registry name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Current counter for `(identity, channel)`.
    async fn get_nonce(&self, identity: &Address, channel: Channel) -> Result<u64>;

    /// Chain id and contract address for domain separation.
    async fn get_domain_info(&self) -> Result<DomainInfo>;

    /// Verify and apply a signed submission. Rejections are reported in the
    /// receipt; `Err` means the registry could not be reached.
    async fn submit(&self, submission: &SignedSubmission) -> Result<SubmissionReceipt>;

    /// Latest record committed for a fingerprint.
    async fn get_record(&self, fingerprint: &Fingerprint) -> Result<Option<TelemetryRecord>>;
}
