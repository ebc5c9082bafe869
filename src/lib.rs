// Library exports for testing and external use

pub mod archive;
pub mod attestation;
pub mod batcher;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod pipeline;
pub mod registry;
pub mod relay;
pub mod signer;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export commonly used types and traits
pub use batcher::{BatcherConfig, TelemetryBatcher};
pub use config::{BaseConfig, SubmissionMode};
pub use crypto::{compute_root, fingerprint, verify};
pub use error::{
    ArchiveError, AttestorError, CoordinatorError, MerkleError, PipelineError, ValidationError,
};
pub use gateway::Gateway;
pub use ingest::TelemetryReading;
pub use pipeline::{CommitmentPipeline, ProcessedBatch, SubmissionOutcome};
pub use signer::{GatewaySigner, NonceCoordinator};
pub use traits::{ArchiveStorage, Attestor, Registry};
pub use types::{Batch, Channel, Fingerprint, MerkleRoot, Sample};

// Re-export variant enums for convenience
pub use archive::{ArchiveVariant, MemoryArchive};
pub use attestation::{AttestorVariant, MemoryAttestor};
pub use registry::MemoryRegistry;
