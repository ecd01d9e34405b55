//! Schema hash: the 128-bit value that binds a claim to its schema.

use sha3::{Digest, Keccak256};

use idenstate_core::SchemaHash;

/// `keccak256(context_url)[16..32]`.
pub fn schema_hash(context_url: &str) -> SchemaHash {
    let digest = Keccak256::digest(context_url.as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[16..]);
    SchemaHash(out)
}
