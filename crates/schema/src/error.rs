//! Error types for the schema pipeline.

use thiserror::Error;

use idenstate_core::{ClaimError, CryptoError, MerkleError, StorageError};

/// Content-addressed storage failures.
#[derive(Debug, Error)]
pub enum PinningError {
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("pinning backend {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to deserialize response from {endpoint}: {source}")]
    Deserialization {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("pinning configuration error: {0}")]
    Config(String),
}

impl PinningError {
    /// Provider status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            PinningError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("schema not found: {0}")]
    NotFound(String),
    #[error("schema {0} is already revoked")]
    AlreadyRevoked(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("JSON-LD context error: {0}")]
    Context(String),
    #[error(transparent)]
    Pinning(#[from] PinningError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchemaError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
