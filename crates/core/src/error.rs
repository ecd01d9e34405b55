//! Error types shared across the identity-state engine.

use thiserror::Error;

/// Hash, signature and curve failures. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid seed length: expected 32 bytes, got {0}")]
    InvalidSeedLength(usize),
    #[error("value is not below the field modulus")]
    FieldOverflow,
    #[error("value is not below the subgroup order")]
    ScalarOverflow,
    #[error("invalid field element encoding: {0}")]
    InvalidEncoding(String),
    #[error("point is not on the Baby Jubjub curve")]
    NotOnCurve,
    #[error("malformed compressed signature: {0}")]
    MalformedSignature(String),
    #[error("poseidon accepts 1..={max} inputs, got {got}")]
    PoseidonArity { got: usize, max: usize },
    #[error("poseidon failure: {0}")]
    Poseidon(String),
}

/// Failures of a node/root store or any relational repository.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage deadlock: {0}")]
    Deadlock(String),
    #[error("storage operation timed out")]
    Timeout,
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("column {column} is not updatable on {table}")]
    ForbiddenColumn { table: String, column: String },
    #[error("invalid status transition on {table}: {from} -> {to}")]
    InvalidTransition { table: String, from: String, to: String },
}

impl StorageError {
    /// Deadlock-class errors get exactly one retry at the repository layer.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, StorageError::Deadlock(_))
    }
}

/// Sparse Merkle tree failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("key already exists in tree")]
    KeyExists,
    #[error("key not found in tree")]
    NotFound,
    #[error("tree depth exhausted")]
    TreeFull,
    #[error("invalid tree depth {0}")]
    InvalidDepth(usize),
    #[error("node {0} referenced but missing from storage")]
    MissingNode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Claim construction and decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("claim encoding: {0}")]
    Encoding(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Identity-state failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("revocation nonce {0} already revoked")]
    AlreadyRevoked(u64),
    #[error("claim already present in the claims tree")]
    KeyExists,
    #[error("invalid DID: {0}")]
    InvalidDid(String),
    #[error(transparent)]
    Merkle(MerkleError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<MerkleError> for IdentityError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::KeyExists => IdentityError::KeyExists,
            MerkleError::Storage(e) => IdentityError::Storage(e),
            MerkleError::Crypto(e) => IdentityError::Crypto(e),
            other => IdentityError::Merkle(other),
        }
    }
}
