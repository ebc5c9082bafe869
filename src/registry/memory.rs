use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::batcher::now_millis;
use crate::signer::{eip712, recover_signer};
use crate::traits::Registry;
use crate::types::{
    hex0x, Address, Channel, DomainInfo, Fingerprint, RejectionReason, SignedSubmission,
    SubmissionReceipt, TelemetryRecord,
};

#[derive(Default)]
struct RegistryState {
    authorized: HashSet<Address>,
    nonces: HashMap<(Address, Channel), u64>,
    records: HashMap<Fingerprint, TelemetryRecord>,
    unavailable: bool,
}

/// In-process stand-in for the on-chain shipment registry.
///
/// Verifies submissions the way the contract does: payload shape, then the
/// recovered signer against the authorized gateway set, then the nonce for
/// `(signer, channel)`. Accepted submissions advance that nonce by one and
/// overwrite the record for the fingerprint.
#[derive(Clone)]
pub struct MemoryRegistry {
    domain: DomainInfo,
    state: Arc<Mutex<RegistryState>>,
}

impl MemoryRegistry {
    pub fn new(domain: DomainInfo) -> Self {
        Self {
            domain,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    pub fn domain(&self) -> DomainInfo {
        self.domain
    }

    pub fn authorize_gateway(&self, gateway: Address) {
        self.lock().authorized.insert(gateway);
    }

    pub fn revoke_gateway(&self, gateway: &Address) {
        self.lock().authorized.remove(gateway);
    }

    /// Simulate the RPC endpoint going away; every call errors until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.lock().unavailable {
            anyhow::bail!("registry endpoint unreachable");
        }
        Ok(())
    }

    fn validate(&self, submission: &SignedSubmission) -> std::result::Result<Address, RejectionReason> {
        let payload = &submission.payload;
        if payload.content_id.trim().is_empty()
            || payload.merkle_root == [0u8; 32]
            || payload.fingerprint == [0u8; 32]
            || !matches!(submission.signature.v, 27 | 28)
        {
            return Err(RejectionReason::MalformedPayload);
        }

        let digest =
            eip712::signing_digest(&self.domain, payload, submission.nonce, submission.channel);
        let signer = recover_signer(&digest, &submission.signature)
            .ok_or(RejectionReason::UnauthorizedSigner)?;

        let state = self.lock();
        if !state.authorized.contains(&signer) {
            return Err(RejectionReason::UnauthorizedSigner);
        }

        let expected = state
            .nonces
            .get(&(signer, submission.channel))
            .copied()
            .unwrap_or(0);
        if submission.nonce != expected {
            return Err(RejectionReason::NonceMismatch);
        }

        Ok(signer)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn name(&self) -> &'static str {
        "memory-registry"
    }

    async fn get_nonce(&self, identity: &Address, channel: Channel) -> Result<u64> {
        self.ensure_available()?;
        Ok(self
            .lock()
            .nonces
            .get(&(*identity, channel))
            .copied()
            .unwrap_or(0))
    }

    async fn get_domain_info(&self) -> Result<DomainInfo> {
        self.ensure_available()?;
        Ok(self.domain)
    }

    async fn submit(&self, submission: &SignedSubmission) -> Result<SubmissionReceipt> {
        self.ensure_available()?;

        let signer = match self.validate(submission) {
            Ok(signer) => signer,
            Err(reason) => {
                warn!(
                    "Registry rejected submission for {}: {}",
                    hex0x(&submission.payload.fingerprint),
                    reason
                );
                return Ok(SubmissionReceipt::rejected(reason));
            }
        };

        let mut state = self.lock();
        // re-check under the same guard as the increment
        let counter = state.nonces.entry((signer, submission.channel)).or_insert(0);
        if *counter != submission.nonce {
            return Ok(SubmissionReceipt::rejected(RejectionReason::NonceMismatch));
        }
        *counter += 1;

        let payload = &submission.payload;
        state.records.insert(
            payload.fingerprint,
            TelemetryRecord {
                gateway: signer,
                merkle_root: payload.merkle_root,
                content_id: payload.content_id.clone(),
                temperature: payload.temperature,
                humidity: payload.humidity,
                tag: payload.tag.clone(),
                recorded_at: now_millis(),
            },
        );

        debug!(
            "Recorded {} from {} on {} channel (nonce {})",
            hex0x(&payload.fingerprint),
            hex0x(&signer),
            submission.channel,
            submission.nonce
        );
        Ok(SubmissionReceipt::accepted())
    }

    async fn get_record(&self, fingerprint: &Fingerprint) -> Result<Option<TelemetryRecord>> {
        self.ensure_available()?;
        Ok(self.lock().records.get(fingerprint).cloned())
    }
}
