//! Sparse Merkle tree engine.
//!
//! This module provides:
//! - The persistent compact tree (insert, lookup, proof generation)
//! - Proof structures and stateless verification
//! - The node-store contract and an in-memory implementation

mod node;
mod proof;
mod store;
mod tree;

#[cfg(test)]
mod tests;

pub use node::{leaf_hash, Node};
pub use proof::{NodeAux, Proof};
pub use store::{MemoryNodeStore, NodeStore, WriteBatch};
pub use tree::{root_from_proof, verify_proof, SparseMerkleTree, DEFAULT_DEPTH, MAX_DEPTH};
