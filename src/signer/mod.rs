//! Gateway identity, typed-data signing and nonce coordination.

pub mod coordinator;
pub mod eip712;

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use crate::crypto::keccak256;
use crate::error::CoordinatorError;
use crate::types::{
    hex0x, parse_hex_array, Address, Channel, DomainInfo, Hash32, SignatureParts,
    TelemetryPayload,
};

pub use coordinator::{InFlightNonces, NonceCoordinator};

/// secp256k1 signing identity of the gateway. May be absent, in which case
/// every signing attempt fails with `SigningUnavailable`.
#[derive(Clone)]
pub struct GatewaySigner {
    key: Option<SigningKey>,
}

impl GatewaySigner {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, CoordinatorError> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| CoordinatorError::InvalidKey(e.to_string()))?;
        Ok(Self { key: Some(key) })
    }

    /// Accepts `0x`-prefixed or bare hex.
    pub fn from_secret_hex(secret: &str) -> Result<Self, CoordinatorError> {
        let bytes: [u8; 32] =
            parse_hex_array(secret).map_err(|e| CoordinatorError::InvalidKey(e.to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn unavailable() -> Self {
        Self { key: None }
    }

    pub fn is_available(&self) -> bool {
        self.key.is_some()
    }

    pub fn address(&self) -> Result<Address, CoordinatorError> {
        let key = self.key.as_ref().ok_or(CoordinatorError::SigningUnavailable)?;
        Ok(address_of(key.verifying_key()))
    }

    /// Sign a 32-byte prehash; `v` is 27 or 28.
    pub fn sign_digest(&self, digest: &Hash32) -> Result<SignatureParts, CoordinatorError> {
        let key = self.key.as_ref().ok_or(CoordinatorError::SigningUnavailable)?;
        let (sig, recid) = key
            .sign_prehash_recoverable(digest)
            .map_err(|e| CoordinatorError::Signing(e.to_string()))?;

        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(SignatureParts {
            v: recid.to_byte() + 27,
            r,
            s,
        })
    }

    /// Domain-separated signature over the submission fields.
    pub fn sign(
        &self,
        domain: &DomainInfo,
        payload: &TelemetryPayload,
        nonce: u64,
        channel: Channel,
    ) -> Result<SignatureParts, CoordinatorError> {
        let digest = eip712::signing_digest(domain, payload, nonce, channel);
        self.sign_digest(&digest)
    }
}

impl fmt::Debug for GatewaySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address() {
            Ok(addr) => write!(f, "GatewaySigner({})", hex0x(&addr)),
            Err(_) => write!(f, "GatewaySigner(unavailable)"),
        }
    }
}

/// Ethereum-style address: last 20 bytes of keccak256 of the uncompressed
/// public key without its 0x04 prefix.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Recover the signer of `digest`. `None` for malformed signatures.
pub fn recover_signer(digest: &Hash32, signature: &SignatureParts) -> Option<Address> {
    let recid = match signature.v {
        27 | 28 => RecoveryId::from_byte(signature.v - 27)?,
        0 | 1 => RecoveryId::from_byte(signature.v)?,
        _ => return None,
    };

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&bytes).ok()?;

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recid).ok()?;
    Some(address_of(&key))
}
