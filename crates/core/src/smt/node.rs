//! Tree node kinds and their storage encoding.

use ark_ff::Zero;

use crate::error::{CryptoError, StorageError};
use crate::field::{fr_from_le_bytes, fr_to_le_bytes, FIELD_BYTES};
use crate::poseidon::{hash_elems, hash_two};
use crate::Fr;

const TAG_MIDDLE: u8 = 0;
const TAG_LEAF: u8 = 1;
const TAG_EMPTY: u8 = 2;

/// Length of an encoded leaf or middle node.
pub const ENCODED_NODE_LEN: usize = 1 + 2 * FIELD_BYTES;

/// A node of the compact sparse Merkle tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    Empty,
    Leaf { key: Fr, value: Fr },
    Middle { left: Fr, right: Fr },
}

impl Node {
    /// Digest under which the node is stored and referenced by its parent.
    ///
    /// Leaves hash as `Poseidon(key, value, 1)`, middles as
    /// `Poseidon(left, right)`, empty subtrees are zero.
    pub fn hash(&self) -> Result<Fr, CryptoError> {
        match self {
            Node::Empty => Ok(Fr::zero()),
            Node::Leaf { key, value } => leaf_hash(*key, *value),
            Node::Middle { left, right } => hash_two(*left, *right),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Node::Empty => vec![TAG_EMPTY],
            Node::Leaf { key, value } => encode_pair(TAG_LEAF, key, value),
            Node::Middle { left, right } => encode_pair(TAG_MIDDLE, left, right),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| StorageError::Corrupt("empty node record".into()))?;
        if *tag == TAG_EMPTY {
            return Ok(Node::Empty);
        }
        if bytes.len() != ENCODED_NODE_LEN {
            return Err(StorageError::Corrupt(format!(
                "node record has {} bytes, expected {ENCODED_NODE_LEN}",
                bytes.len()
            )));
        }
        let a = fr_from_le_bytes(&body[..FIELD_BYTES])
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let b = fr_from_le_bytes(&body[FIELD_BYTES..])
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        match *tag {
            TAG_LEAF => Ok(Node::Leaf { key: a, value: b }),
            TAG_MIDDLE => Ok(Node::Middle { left: a, right: b }),
            other => Err(StorageError::Corrupt(format!("unknown node tag {other}"))),
        }
    }
}

fn encode_pair(tag: u8, a: &Fr, b: &Fr) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENCODED_NODE_LEN);
    out.push(tag);
    out.extend_from_slice(&fr_to_le_bytes(a));
    out.extend_from_slice(&fr_to_le_bytes(b));
    out
}

/// `Poseidon(key, value, 1)`.
pub fn leaf_hash(key: Fr, value: Fr) -> Result<Fr, CryptoError> {
    hash_elems(key, value, Fr::from(1u64))
}
