use super::abi::{self, Token};
use super::keccak256;
use crate::types::Fingerprint;

/// Shipment key: `keccak256(abi.encode(string shipmentId, string batchId))`.
///
/// Matches the registry's on-chain derivation. Each string is length-prefixed
/// by the ABI encoding, so `("AB", "C")` and `("A", "BC")` differ.
pub fn fingerprint(shipment_id: &str, batch_id: &str) -> Fingerprint {
    keccak256(&abi::encode(&[
        Token::String(shipment_id),
        Token::String(batch_id),
    ]))
}
