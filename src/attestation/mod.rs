//! Attestation fan-out: task payloads, attestor implementations, the
//! per-fingerprint task tracker and the integrity checks attestors run.

pub mod checks;
pub mod disabled;
pub mod memory;
pub mod tracker;
pub mod variant;

use crate::crypto::abi::{self, Token};
use crate::crypto::keccak256;
use crate::types::{
    AttestationType, ContentId, Fingerprint, MerkleRoot, TaskId, TemperatureThresholds,
};

pub use checks::{CheckOutcome, IntegrityReport, IntegrityVerifier, ThresholdViolation};
pub use disabled::DisabledAttestor;
pub use memory::MemoryAttestor;
pub use tracker::AttestationTracker;
pub use variant::AttestorVariant;

/// Batch facts every attestation task carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationRequest {
    pub content_id: ContentId,
    pub merkle_root: MerkleRoot,
    pub fingerprint: Fingerprint,
    pub temperature: i64,
    pub humidity: u64,
    pub thresholds: TemperatureThresholds,
}

/// `abi.encode(string type, string cid, bytes32 root, bytes32 key,
/// int256 temperature, int256 tempMin, int256 tempMax)`
pub fn encode_task_payload(kind: AttestationType, request: &AttestationRequest) -> Vec<u8> {
    abi::encode(&[
        Token::String(kind.as_str()),
        Token::String(&request.content_id),
        Token::FixedBytes(request.merkle_root),
        Token::FixedBytes(request.fingerprint),
        Token::Int(request.temperature),
        Token::Int(request.thresholds.min),
        Token::Int(request.thresholds.max),
    ])
}

/// Inverse of [`encode_task_payload`]. Humidity is not part of the payload
/// and comes back as 0. `None` for anything that is not a task payload.
pub fn decode_task_payload(payload: &[u8]) -> Option<(AttestationType, AttestationRequest)> {
    let kind_name = abi::string_at(payload, 0)?;
    let kind = AttestationType::ALL
        .into_iter()
        .find(|k| k.as_str() == kind_name)?;
    let int = |index| abi::word_at(payload, index).and_then(|w| abi::word_to_i64(&w));

    let request = AttestationRequest {
        content_id: abi::string_at(payload, 1)?,
        merkle_root: abi::word_at(payload, 2)?,
        fingerprint: abi::word_at(payload, 3)?,
        temperature: int(4)?,
        humidity: 0,
        thresholds: TemperatureThresholds {
            min: int(5)?,
            max: int(6)?,
        },
    };
    Some((kind, request))
}

/// `keccak256(abi.encode(string type, bytes payload, uint256 createdAtMs))`
pub fn task_id(kind: AttestationType, payload: &[u8], created_at: u64) -> TaskId {
    keccak256(&abi::encode(&[
        Token::String(kind.as_str()),
        Token::Bytes(payload),
        Token::Uint(created_at),
    ]))
}
