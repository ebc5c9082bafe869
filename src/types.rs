use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed-size types used across the system.
pub type Hash32 = [u8; 32];
pub type Fingerprint = [u8; 32];
pub type MerkleRoot = [u8; 32];
pub type TaskId = [u8; 32];
pub type Address = [u8; 20];

/// Content identifier returned by the archive.
pub type ContentId = String;

/// One sensor reading.
///
/// Temperature is hundredths of a degree, humidity hundredths of a percent.
/// `timestamp` is milliseconds since epoch and is stamped by the batcher on
/// insertion; any value set by the caller is overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub shipment_id: String,
    pub batch_id: String,
    pub temperature: i64,
    pub humidity: u64,
    #[serde(rename = "rfidTag", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub timestamp: u64,
}

impl Sample {
    pub fn new(
        shipment_id: impl Into<String>,
        batch_id: impl Into<String>,
        temperature: i64,
        humidity: u64,
    ) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            batch_id: batch_id.into(),
            temperature,
            humidity,
            tag: None,
            metadata: None,
            timestamp: 0,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An ordered, never-empty group of samples sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Batch {
    samples: Vec<Sample>,
}

impl Batch {
    /// Returns `None` for an empty sequence: an empty batch is not representable.
    pub fn new(samples: Vec<Sample>) -> Option<Self> {
        if samples.is_empty() {
            None
        } else {
            Some(Self { samples })
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn first(&self) -> &Sample {
        // non-empty by construction
        &self.samples[0]
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

/// What closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushTrigger {
    Size,
    Timeout,
    Drain,
}

/// A batch handed from the batcher to the pipeline.
#[derive(Debug, Clone)]
pub struct ReadyBatch {
    pub fingerprint: Fingerprint,
    pub batch: Batch,
    pub trigger: FlushTrigger,
}

/// Nonce track on the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Gateway submits and pays.
    Sync,
    /// Submission is relayed by a third party.
    Async,
}

impl Channel {
    pub fn is_async(self) -> bool {
        matches!(self, Channel::Async)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Sync => write!(f, "sync"),
            Channel::Async => write!(f, "async"),
        }
    }
}

/// Registry chain identity used for domain separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub chain_id: u64,
    pub contract_address: Address,
}

/// Batch-level fields committed on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub fingerprint: Fingerprint,
    pub merkle_root: MerkleRoot,
    pub content_id: ContentId,
    pub temperature: i64,
    pub humidity: u64,
    pub tag: String,
}

/// secp256k1 signature split the way the registry consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureParts {
    pub v: u8,
    pub r: Hash32,
    pub s: Hash32,
}

/// Authenticated submission tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedSubmission {
    pub payload: TelemetryPayload,
    pub nonce: u64,
    pub channel: Channel,
    pub signature: SignatureParts,
    /// Address the gateway signed as. Verifiers recover the signer
    /// independently; relayers use this to look up the nonce.
    pub gateway: Address,
}

/// Registry-side rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionReason {
    UnauthorizedSigner,
    NonceMismatch,
    MalformedPayload,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::UnauthorizedSigner => write!(f, "unauthorized-signer"),
            RejectionReason::NonceMismatch => write!(f, "nonce-mismatch"),
            RejectionReason::MalformedPayload => write!(f, "malformed-payload"),
        }
    }
}

/// Result of `Registry::submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub accepted: bool,
    pub reason: Option<RejectionReason>,
}

impl SubmissionReceipt {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }
}

/// Record stored by the registry per fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub gateway: Address,
    pub merkle_root: MerkleRoot,
    pub content_id: ContentId,
    pub temperature: i64,
    pub humidity: u64,
    pub tag: String,
    pub recorded_at: u64,
}

/// Fixed set of attestation checks fanned out per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationType {
    DataValidity,
    ThresholdCompliance,
    MerkleIntegrity,
    ArchiveVerified,
    FullIntegrity,
}

impl AttestationType {
    pub const ALL: [AttestationType; 5] = [
        AttestationType::DataValidity,
        AttestationType::ThresholdCompliance,
        AttestationType::MerkleIntegrity,
        AttestationType::ArchiveVerified,
        AttestationType::FullIntegrity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttestationType::DataValidity => "data-validity",
            AttestationType::ThresholdCompliance => "threshold-compliance",
            AttestationType::MerkleIntegrity => "merkle-integrity",
            AttestationType::ArchiveVerified => "archive-verified",
            AttestationType::FullIntegrity => "full-integrity",
        }
    }
}

impl fmt::Display for AttestationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationTask {
    pub task_id: TaskId,
    pub kind: AttestationType,
    pub status: TaskStatus,
    pub result: Option<String>,
    /// Unix millis.
    pub created_at: u64,
}

/// Attestor's answer to a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationResult {
    pub completed: bool,
    pub result: Option<String>,
    pub timestamp: Option<u64>,
}

impl AttestationResult {
    pub fn pending() -> Self {
        Self {
            completed: false,
            result: None,
            timestamp: None,
        }
    }
}

/// Scaled temperature bounds (hundredths of a degree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureThresholds {
    pub min: i64,
    pub max: i64,
}

impl Default for TemperatureThresholds {
    fn default() -> Self {
        // -20.00 .. 8.00 degrees, cold chain standard
        Self {
            min: -2000,
            max: 800,
        }
    }
}

/// `0x`-prefixed lowercase hex.
pub fn hex0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a `0x`-prefixed (or bare) hex string into a fixed-size array.
pub fn parse_hex_array<const N: usize>(input: &str) -> anyhow::Result<[u8; N]> {
    let trimmed = input.trim();
    let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(raw)?;
    if bytes.len() != N {
        anyhow::bail!("expected {} bytes, got {}", N, bytes.len());
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_rejects_empty() {
        assert!(Batch::new(Vec::new()).is_none());
        let batch = Batch::new(vec![Sample::new("S", "B", 2500, 6500)]).unwrap();
        assert_eq!(batch.sample_count(), 1);
        assert_eq!(batch.first().temperature, 2500);
    }

    #[test]
    fn test_parse_hex_array() {
        let addr: Address = parse_hex_array("0x8DfD8F3b766085ea072FB4C5EE60669e25CC915C").unwrap();
        assert_eq!(hex0x(&addr), "0x8dfd8f3b766085ea072fb4c5ee60669e25cc915c");
        assert!(parse_hex_array::<20>("0x1234").is_err());
        assert!(parse_hex_array::<2>("zz00").is_err());
    }

    #[test]
    fn test_sample_serializes_camel_case() {
        let sample = Sample::new("S1", "B1", -150, 7000).with_tag("RFID-1");
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["shipmentId"], "S1");
        assert_eq!(json["rfidTag"], "RFID-1");
        assert!(json.get("metadata").is_none());
    }
}
