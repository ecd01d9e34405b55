//! Errors raised while assembling circuit inputs.

use idenstate_core::{ClaimError, CryptoError, IdentityError, MerkleError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputsError {
    #[error("auth claim unusable: {0}")]
    MissingAuthClaim(String),
    #[error("cannot produce proof for claim {claim}: {reason}")]
    ProofGenerationFailed { claim: String, reason: String },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("signature does not verify against the signer's auth key")]
    InvalidSignature,
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl From<MerkleError> for InputsError {
    fn from(err: MerkleError) -> Self {
        InputsError::Identity(err.into())
    }
}

impl From<ClaimError> for InputsError {
    fn from(err: ClaimError) -> Self {
        InputsError::Identity(err.into())
    }
}

impl From<CryptoError> for InputsError {
    fn from(err: CryptoError) -> Self {
        InputsError::Identity(err.into())
    }
}

impl From<serde_json::Error> for InputsError {
    fn from(err: serde_json::Error) -> Self {
        InputsError::Serialization(err.to_string())
    }
}
