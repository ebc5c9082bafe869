//! Verifications an attestor performs against an archived batch.
//!
//! Each check re-fetches the batch by content id, so a passing result proves
//! the archived bytes (not the gateway's memory) match the commitment.

use serde_json::Value;

use super::AttestationRequest;
use crate::crypto::compute_root;
use crate::traits::ArchiveStorage;
use crate::types::{hex0x, AttestationType, MerkleRoot, TemperatureThresholds};

const REQUIRED_SAMPLE_FIELDS: [&str; 3] = ["temperature", "humidity", "timestamp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub valid: bool,
    pub reason: Option<String>,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdViolation {
    pub index: usize,
    pub temperature: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checks: Vec<(AttestationType, CheckOutcome)>,
    pub overall_valid: bool,
}

pub struct IntegrityVerifier<'a, A: ArchiveStorage + ?Sized> {
    archive: &'a A,
}

impl<'a, A: ArchiveStorage + ?Sized> IntegrityVerifier<'a, A> {
    pub fn new(archive: &'a A) -> Self {
        Self { archive }
    }

    async fn fetch(&self, content_id: &str) -> Result<Vec<Value>, String> {
        let bytes = match self.archive.get(content_id).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(format!("content {} not found", content_id)),
            Err(e) => return Err(format!("archive fetch failed: {:#}", e)),
        };
        serde_json::from_slice::<Vec<Value>>(&bytes)
            .map_err(|e| format!("invalid batch data: {}", e))
    }

    /// Archived batch parses, is non-empty, hashes to `expected_root`, and
    /// every sample carries temperature, humidity and timestamp.
    pub async fn sensor_data_validity(
        &self,
        content_id: &str,
        expected_root: &MerkleRoot,
    ) -> CheckOutcome {
        let samples = match self.fetch(content_id).await {
            Ok(samples) => samples,
            Err(reason) => return CheckOutcome::fail(reason),
        };
        if samples.is_empty() {
            return CheckOutcome::fail("empty batch");
        }

        let root = match compute_root(&samples) {
            Ok(root) => root,
            Err(e) => return CheckOutcome::fail(e.to_string()),
        };
        if &root != expected_root {
            return CheckOutcome::fail(format!(
                "merkle root mismatch: expected {}, got {}",
                hex0x(expected_root),
                hex0x(&root)
            ));
        }

        for (i, sample) in samples.iter().enumerate() {
            let complete = sample
                .as_object()
                .map(|obj| REQUIRED_SAMPLE_FIELDS.iter().all(|f| obj.contains_key(*f)))
                .unwrap_or(false);
            if !complete {
                return CheckOutcome::fail(format!("sample {} is missing required fields", i));
            }
        }

        CheckOutcome::pass()
    }

    /// Every sample whose temperature lies outside `thresholds`.
    pub async fn threshold_violations(
        &self,
        content_id: &str,
        thresholds: TemperatureThresholds,
    ) -> Result<Vec<ThresholdViolation>, String> {
        let samples = self.fetch(content_id).await?;
        let mut violations = Vec::new();
        for (index, sample) in samples.iter().enumerate() {
            let temperature = sample
                .get("temperature")
                .and_then(Value::as_i64)
                .ok_or_else(|| format!("sample {} has no integer temperature", index))?;
            if temperature < thresholds.min || temperature > thresholds.max {
                violations.push(ThresholdViolation { index, temperature });
            }
        }
        Ok(violations)
    }

    pub async fn temperature_compliance(
        &self,
        content_id: &str,
        thresholds: TemperatureThresholds,
    ) -> CheckOutcome {
        match self.threshold_violations(content_id, thresholds).await {
            Ok(violations) if violations.is_empty() => CheckOutcome::pass(),
            Ok(violations) => CheckOutcome::fail(format!(
                "{} samples outside {}..{}",
                violations.len(),
                thresholds.min,
                thresholds.max
            )),
            Err(reason) => CheckOutcome::fail(reason),
        }
    }

    pub async fn merkle_integrity(&self, content_id: &str, expected_root: &MerkleRoot) -> CheckOutcome {
        let samples = match self.fetch(content_id).await {
            Ok(samples) => samples,
            Err(reason) => return CheckOutcome::fail(reason),
        };
        match compute_root(&samples) {
            Ok(root) if &root == expected_root => CheckOutcome::pass(),
            Ok(root) => CheckOutcome::fail(format!(
                "expected {}, computed {}",
                hex0x(expected_root),
                hex0x(&root)
            )),
            Err(e) => CheckOutcome::fail(e.to_string()),
        }
    }

    pub async fn archive_available(&self, content_id: &str) -> CheckOutcome {
        match self.archive.get(content_id).await {
            Ok(Some(_)) => CheckOutcome::pass(),
            Ok(None) => CheckOutcome::fail(format!("content {} not found", content_id)),
            Err(e) => CheckOutcome::fail(format!("archive fetch failed: {:#}", e)),
        }
    }

    /// Every individual check; valid only if all pass.
    pub async fn full_integrity(&self, request: &AttestationRequest) -> IntegrityReport {
        let checks = vec![
            (
                AttestationType::ArchiveVerified,
                self.archive_available(&request.content_id).await,
            ),
            (
                AttestationType::MerkleIntegrity,
                self.merkle_integrity(&request.content_id, &request.merkle_root)
                    .await,
            ),
            (
                AttestationType::ThresholdCompliance,
                self.temperature_compliance(&request.content_id, request.thresholds)
                    .await,
            ),
            (
                AttestationType::DataValidity,
                self.sensor_data_validity(&request.content_id, &request.merkle_root)
                    .await,
            ),
        ];
        let overall_valid = checks.iter().all(|(_, outcome)| outcome.valid);
        IntegrityReport {
            checks,
            overall_valid,
        }
    }

    /// Run the check an attestation task of `kind` asks for.
    pub async fn verify(&self, kind: AttestationType, request: &AttestationRequest) -> CheckOutcome {
        match kind {
            AttestationType::DataValidity => {
                self.sensor_data_validity(&request.content_id, &request.merkle_root)
                    .await
            }
            AttestationType::ThresholdCompliance => {
                self.temperature_compliance(&request.content_id, request.thresholds)
                    .await
            }
            AttestationType::MerkleIntegrity => {
                self.merkle_integrity(&request.content_id, &request.merkle_root)
                    .await
            }
            AttestationType::ArchiveVerified => self.archive_available(&request.content_id).await,
            AttestationType::FullIntegrity => {
                let report = self.full_integrity(request).await;
                if report.overall_valid {
                    CheckOutcome::pass()
                } else {
                    let failed: Vec<&str> = report
                        .checks
                        .iter()
                        .filter(|(_, o)| !o.valid)
                        .map(|(kind, _)| kind.as_str())
                        .collect();
                    CheckOutcome::fail(format!("failed checks: {}", failed.join(", ")))
                }
            }
        }
    }
}
