//! Typed structured-data hashing for `RecordTelemetry` submissions.

use crate::crypto::abi::{self, Token};
use crate::crypto::keccak256;
use crate::types::{Channel, DomainInfo, Hash32, TelemetryPayload};

pub const DOMAIN_NAME: &str = "ShipmentRegistryEVVM";
pub const DOMAIN_VERSION: &str = "1";

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const RECORD_TELEMETRY_TYPE: &str = "RecordTelemetry(bytes32 shipmentKey,bytes32 merkleRoot,string cid,int256 temperature,uint256 humidity,string rfidTag,uint256 nonce,bool isAsync)";

pub fn domain_separator_for(name: &str, version: &str, domain: &DomainInfo) -> Hash32 {
    keccak256(&abi::encode(&[
        Token::FixedBytes(keccak256(DOMAIN_TYPE.as_bytes())),
        Token::FixedBytes(keccak256(name.as_bytes())),
        Token::FixedBytes(keccak256(version.as_bytes())),
        Token::Uint(domain.chain_id),
        Token::Address(domain.contract_address),
    ]))
}

pub fn domain_separator(domain: &DomainInfo) -> Hash32 {
    domain_separator_for(DOMAIN_NAME, DOMAIN_VERSION, domain)
}

/// Struct hash over exactly the signed fields; dynamic strings are hashed.
pub fn struct_hash(payload: &TelemetryPayload, nonce: u64, channel: Channel) -> Hash32 {
    keccak256(&abi::encode(&[
        Token::FixedBytes(keccak256(RECORD_TELEMETRY_TYPE.as_bytes())),
        Token::FixedBytes(payload.fingerprint),
        Token::FixedBytes(payload.merkle_root),
        Token::FixedBytes(keccak256(payload.content_id.as_bytes())),
        Token::Int(payload.temperature),
        Token::Uint(payload.humidity),
        Token::FixedBytes(keccak256(payload.tag.as_bytes())),
        Token::Uint(nonce),
        Token::Bool(channel.is_async()),
    ]))
}

/// `keccak256(0x19 0x01 || domainSeparator || structHash)`
pub fn signing_digest(
    domain: &DomainInfo,
    payload: &TelemetryPayload,
    nonce: u64,
    channel: Channel,
) -> Hash32 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(&domain_separator(domain));
    buf.extend_from_slice(&struct_hash(payload, nonce, channel));
    keccak256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_hex_array;

    fn payload() -> TelemetryPayload {
        TelemetryPayload {
            fingerprint: [1u8; 32],
            merkle_root: [2u8; 32],
            content_id: "sha256-abc".to_string(),
            temperature: -150,
            humidity: 7000,
            tag: "RFID-1".to_string(),
        }
    }

    #[test]
    fn test_domain_separator_reference_vector() {
        // "Ether Mail" domain from the EIP-712 reference example
        let domain = DomainInfo {
            chain_id: 1,
            contract_address: parse_hex_array("0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC").unwrap(),
        };
        assert_eq!(
            hex::encode(domain_separator_for("Ether Mail", "1", &domain)),
            "f2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
        );
    }

    #[test]
    fn test_digest_binds_every_field() {
        let domain = DomainInfo {
            chain_id: 421614,
            contract_address: [0xaa; 20],
        };
        let base = signing_digest(&domain, &payload(), 0, Channel::Sync);

        assert_ne!(base, signing_digest(&domain, &payload(), 1, Channel::Sync));
        assert_ne!(base, signing_digest(&domain, &payload(), 0, Channel::Async));

        let mut p = payload();
        p.content_id.push('x');
        assert_ne!(base, signing_digest(&domain, &p, 0, Channel::Sync));

        let mut p = payload();
        p.tag.clear();
        assert_ne!(base, signing_digest(&domain, &p, 0, Channel::Sync));

        let other_chain = DomainInfo {
            chain_id: 1,
            ..domain
        };
        assert_ne!(base, signing_digest(&other_chain, &payload(), 0, Channel::Sync));

        let other_contract = DomainInfo {
            contract_address: [0xbb; 20],
            ..domain
        };
        assert_ne!(base, signing_digest(&other_contract, &payload(), 0, Channel::Sync));
    }
}
