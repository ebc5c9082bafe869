pub mod abi;
pub mod fingerprint;
pub mod merkle;

use sha3::{Digest, Keccak256};

use crate::types::Hash32;

pub use fingerprint::fingerprint;
pub use merkle::{compute_root, generate_proof, leaf_hash, verify, MerkleTree};

pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty_vector() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
