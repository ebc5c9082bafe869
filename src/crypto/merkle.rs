//! Order-sensitive Merkle commitment over a batch of samples.
//!
//! Leaves are `keccak256` of each sample's canonical JSON (keys sorted at every
//! depth), kept in insertion order. Each level hashes adjacent pairs after
//! sorting the two hashes, so a proof needs no left/right flags. An odd node
//! at the end of a level is carried up unchanged.

use serde::Serialize;
use serde_json::Value;

use super::keccak256;
use crate::error::MerkleError;
use crate::types::{Hash32, MerkleRoot};

pub struct MerkleTree {
    /// `layers[0]` are the leaves, the last layer holds the root.
    layers: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<Hash32>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyInput);
        }

        let mut layers = vec![leaves];
        while layers[layers.len() - 1].len() > 1 {
            let current = &layers[layers.len() - 1];
            let mut next_level = Vec::with_capacity(current.len().div_ceil(2));

            for chunk in current.chunks(2) {
                let hash = if chunk.len() == 2 {
                    hash_sorted_pair(&chunk[0], &chunk[1])
                } else {
                    chunk[0]
                };
                next_level.push(hash);
            }

            layers.push(next_level);
        }

        Ok(Self { layers })
    }

    pub fn root(&self) -> MerkleRoot {
        self.layers[self.layers.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    /// Sibling hashes from the leaf level upwards. `None` if `index` is out
    /// of range.
    pub fn proof(&self, index: usize) -> Option<Vec<Hash32>> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut proof = Vec::new();
        let mut current_index = index;

        for level in &self.layers[..self.layers.len() - 1] {
            let sibling_index = if current_index % 2 == 0 {
                current_index + 1
            } else {
                current_index - 1
            };

            if sibling_index < level.len() {
                proof.push(level[sibling_index]);
            }

            current_index /= 2;
        }

        Some(proof)
    }
}

/// Commutative pair hash: `keccak256(min(a, b) || max(a, b))`.
pub fn hash_sorted_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo);
    buf[32..].copy_from_slice(hi);
    keccak256(&buf)
}

/// JSON bytes with object keys sorted recursively, no whitespace.
pub fn canonical_bytes<T: Serialize>(item: &T) -> Result<Vec<u8>, MerkleError> {
    let value = serde_json::to_value(item)?;
    Ok(serde_json::to_vec(&canonicalize(value))?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

pub fn leaf_hash<T: Serialize>(item: &T) -> Result<Hash32, MerkleError> {
    Ok(keccak256(&canonical_bytes(item)?))
}

pub fn compute_leaves<T: Serialize>(items: &[T]) -> Result<Vec<Hash32>, MerkleError> {
    items.iter().map(leaf_hash).collect()
}

/// Root over `items` in the given order. Empty input is an error, never a
/// zero digest.
pub fn compute_root<T: Serialize>(items: &[T]) -> Result<MerkleRoot, MerkleError> {
    if items.is_empty() {
        return Err(MerkleError::EmptyInput);
    }
    let tree = MerkleTree::from_leaves(compute_leaves(items)?)?;
    Ok(tree.root())
}

/// Inclusion proof for `items[index]`; `Ok(None)` when out of range.
pub fn generate_proof<T: Serialize>(
    items: &[T],
    index: usize,
) -> Result<Option<Vec<Hash32>>, MerkleError> {
    let tree = MerkleTree::from_leaves(compute_leaves(items)?)?;
    Ok(tree.proof(index))
}

pub fn verify<T: Serialize>(
    item: &T,
    root: &MerkleRoot,
    proof: &[Hash32],
) -> Result<bool, MerkleError> {
    let mut cur = leaf_hash(item)?;
    for sibling in proof {
        cur = hash_sorted_pair(&cur, sibling);
    }
    Ok(&cur == root)
}
