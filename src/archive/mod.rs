pub mod file;
pub mod memory;
pub mod variant;

use sha2::{Digest, Sha256};

pub use file::FileArchive;
pub use memory::MemoryArchive;
pub use variant::ArchiveVariant;

const CONTENT_ID_PREFIX: &str = "sha256-";

/// Content id for `bytes`: `sha256-` followed by the hex digest.
pub fn content_id(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}{}", CONTENT_ID_PREFIX, hex::encode(digest))
}

/// Whether `id` has the shape produced by [`content_id`].
pub fn is_content_id(id: &str) -> bool {
    id.strip_prefix(CONTENT_ID_PREFIX)
        .map(|h| h.len() == 64 && h.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Right-pad with ASCII spaces up to `min`. Trailing whitespace keeps padded
/// JSON parseable.
pub fn pad_payload(mut bytes: Vec<u8>, min: usize) -> Vec<u8> {
    if bytes.len() < min {
        bytes.resize(min, b' ');
    }
    bytes
}
