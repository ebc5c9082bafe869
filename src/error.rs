use thiserror::Error;

use crate::types::RejectionReason;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("cannot commit to an empty batch")]
    EmptyInput,

    #[error("failed to serialize leaf: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Rejections at the ingestion boundary. Nothing is inserted when these occur.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    #[error("payload too small: {size} bytes, archive requires at least {min}")]
    PayloadTooSmall { size: usize, min: usize },

    #[error("archive unavailable: {0}")]
    Unavailable(String),

    #[error("content not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("no signing identity configured")]
    SigningUnavailable,

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestorError {
    #[error("attestation network unavailable: {0}")]
    Unavailable(String),

    #[error("unknown attestation task {0}")]
    UnknownTask(String),
}

/// Hard failures of `CommitmentPipeline::process_batch`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("archive upload failed: {0}")]
    Archive(String),

    #[error(transparent)]
    PayloadTooSmall(ArchiveError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("registry submission failed: {0}")]
    Registry(String),

    #[error("registry rejected submission: {0}")]
    Rejected(RejectionReason),

    #[error("relay queue closed: {0}")]
    Relay(String),
}

impl PipelineError {
    /// A nonce mismatch means another submission advanced the counter; the
    /// caller may re-fetch the nonce and try again. Nothing else is retryable
    /// without outside intervention.
    pub fn is_retryable_after_refetch(&self) -> bool {
        matches!(self, PipelineError::Rejected(RejectionReason::NonceMismatch))
    }
}
