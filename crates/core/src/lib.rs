//! Cryptographic identity engine for the Iden3 identity model.
//!
//! This crate provides:
//! - Poseidon hashing and Baby Jubjub EdDSA over BN254 (`poseidon`, `babyjub`)
//! - A persistent, fixed-depth sparse Merkle tree (`smt`)
//! - The 8-slot claim codec (`claim`)
//! - The triple-tree identity state and its proofs (`identity`)
//! - Identifier and DID derivation (`did`)

pub mod babyjub;
pub mod claim;
pub mod did;
pub mod error;
pub mod field;
pub mod identity;
pub mod poseidon;
pub mod smt;

pub use babyjub::{Point, PrivateKey, PublicKey, Signature};
pub use claim::{Claim, ClaimOption, SchemaHash, SubjectPosition};
pub use did::{Blockchain, Did, DidMethod, Id, Network};
pub use error::{ClaimError, CryptoError, IdentityError, MerkleError, StorageError};
pub use identity::{auth_claim, IdentityState, TreeHandles, TreeState};
pub use poseidon::{hash_elems, poseidon};
pub use smt::{MemoryNodeStore, NodeStore, Proof, SparseMerkleTree};

/// BN254 scalar field; every hash, root and state value lives here.
pub type Fr = ark_bn254::Fr;
