use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::GatewaySigner;
use crate::error::CoordinatorError;
use crate::traits::Registry;
use crate::types::{
    hex0x, Address, Channel, SignatureParts, SignedSubmission, TelemetryPayload,
};

/// Nonces signed and handed to a relayer but not yet applied by the registry.
///
/// Stores the next nonce to hand out per `(identity, channel)`. An entry only
/// matters while it is ahead of the registry; once the registry catches up it
/// is dropped.
#[derive(Clone, Default)]
pub struct InFlightNonces {
    next: Arc<Mutex<HashMap<(Address, Channel), u64>>>,
}

impl InFlightNonces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nonce to sign with, given the registry's current counter.
    pub fn next_nonce(&self, identity: &Address, channel: Channel, registry_nonce: u64) -> u64 {
        let mut next = self.lock();
        match next.get(&(*identity, channel)) {
            Some(&queued) if queued > registry_nonce => queued,
            _ => {
                next.remove(&(*identity, channel));
                registry_nonce
            }
        }
    }

    pub fn mark_queued(&self, identity: &Address, channel: Channel, nonce: u64) {
        let mut next = self.lock();
        let entry = next.entry((*identity, channel)).or_insert(0);
        *entry = (*entry).max(nonce + 1);
    }

    /// A queued message will never reach the registry. When it was the
    /// newest one handed out, forget the entry so the next signature falls
    /// back to the registry's counter; older drops wait for the newest.
    pub fn abandon(&self, identity: &Address, channel: Channel, nonce: u64) {
        let mut next = self.lock();
        if next.get(&(*identity, channel)) == Some(&(nonce + 1)) {
            next.remove(&(*identity, channel));
        }
    }

    /// Next nonce tracked for `(identity, channel)`, if any is in flight.
    pub fn pending(&self, identity: &Address, channel: Channel) -> Option<u64> {
        self.lock().get(&(*identity, channel)).copied()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Address, Channel), u64>> {
        self.next
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reads nonces from the registry and signs against them.
///
/// The registry is re-read on every call. On top of it, nonces already handed
/// to the relay queue are skipped so queued submissions never share one.
/// Failures are surfaced as-is; retrying is the caller's decision.
pub struct NonceCoordinator {
    registry: Arc<dyn Registry>,
    signer: GatewaySigner,
    in_flight: InFlightNonces,
}

impl NonceCoordinator {
    pub fn new(registry: Arc<dyn Registry>, signer: GatewaySigner) -> Self {
        Self {
            registry,
            signer,
            in_flight: InFlightNonces::new(),
        }
    }

    /// Shared with the relayer so dropped messages release their nonce.
    pub fn in_flight(&self) -> InFlightNonces {
        self.in_flight.clone()
    }

    /// Record that a submission signed with `nonce` is waiting in the relay
    /// queue.
    pub fn mark_queued(&self, identity: &Address, channel: Channel, nonce: u64) {
        self.in_flight.mark_queued(identity, channel, nonce);
    }

    pub fn gateway_address(&self) -> Result<Address, CoordinatorError> {
        self.signer.address()
    }

    pub async fn current_nonce(
        &self,
        identity: &Address,
        channel: Channel,
    ) -> Result<u64, CoordinatorError> {
        self.registry
            .get_nonce(identity, channel)
            .await
            .map_err(|e| CoordinatorError::RegistryUnavailable(format!("{:#}", e)))
    }

    pub async fn sign(
        &self,
        payload: &TelemetryPayload,
        nonce: u64,
        channel: Channel,
    ) -> Result<SignatureParts, CoordinatorError> {
        // fail before touching the network when there is no key
        self.signer.address()?;
        let domain = self
            .registry
            .get_domain_info()
            .await
            .map_err(|e| CoordinatorError::RegistryUnavailable(format!("{:#}", e)))?;
        self.signer.sign(&domain, payload, nonce, channel)
    }

    /// Fetch the nonce for the gateway on `channel`, skip past any still in
    /// the relay queue, and sign the payload.
    pub async fn authorize(
        &self,
        payload: TelemetryPayload,
        channel: Channel,
    ) -> Result<SignedSubmission, CoordinatorError> {
        let gateway = self.signer.address()?;
        let registry_nonce = self.current_nonce(&gateway, channel).await?;
        let nonce = self.in_flight.next_nonce(&gateway, channel, registry_nonce);
        debug!(
            "Current {} nonce for {}: {} (registry {})",
            channel,
            hex0x(&gateway),
            nonce,
            registry_nonce
        );

        let signature = self.sign(&payload, nonce, channel).await?;

        Ok(SignedSubmission {
            payload,
            nonce,
            channel,
            signature,
            gateway,
        })
    }
}
