//! Node-level error type and its stable machine-readable codes.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use idenstate_circuits::InputsError;
use idenstate_core::{ClaimError, CryptoError, IdentityError, MerkleError, StorageError};
use idenstate_schema::{PinningError, SchemaError};
use idenstate_store::DeadlockAware;

/// Stable code attached to every error surfaced by the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalServer,
    BadRequest,
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    UserNotFound,
    SchemaNotFound,
    CredentialNotFound,
    RequestNotFound,
    AlreadyRevoked,
    ProofGenerationFailed,
    PinningFailed,
    Timeout,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InternalServer => "INTERNAL_SERVER",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::SchemaNotFound => "SCHEMA_NOT_FOUND",
            ErrorCode::CredentialNotFound => "CREDENTIAL_NOT_FOUND",
            ErrorCode::RequestNotFound => "REQUEST_NOT_FOUND",
            ErrorCode::AlreadyRevoked => "ALREADY_REVOKED",
            ErrorCode::ProofGenerationFailed => "PROOF_GENERATION_FAILED",
            ErrorCode::PinningFailed => "PINNING_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup target of a [`NodeError::NotFound`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Identity,
    Schema,
    Credential,
    CredentialRequest,
    ProofRequest,
    ProofResponse,
    StateTransition,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Identity => "identity",
            Entity::Schema => "schema",
            Entity::Credential => "credential",
            Entity::CredentialRequest => "credential request",
            Entity::ProofRequest => "proof request",
            Entity::ProofResponse => "proof response",
            Entity::StateTransition => "state transition",
        })
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("revocation nonce {0} is already revoked")]
    AlreadyRevoked(u64),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Inputs(#[from] InputsError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for NodeError {
    fn from(err: CryptoError) -> Self {
        NodeError::Identity(err.into())
    }
}

impl From<ClaimError> for NodeError {
    fn from(err: ClaimError) -> Self {
        NodeError::Identity(err.into())
    }
}

impl From<MerkleError> for NodeError {
    fn from(err: MerkleError) -> Self {
        NodeError::Identity(err.into())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Inputs(err.into())
    }
}

impl NodeError {
    pub fn not_found(entity: Entity, id: impl fmt::Display) -> Self {
        NodeError::NotFound { entity, id: id.to_string() }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NodeError::Validation { field: field.into(), reason: reason.into() }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::Config(_) | NodeError::Io(_) => ErrorCode::InternalServer,
            NodeError::NotFound { entity, .. } => match entity {
                Entity::Identity => ErrorCode::UserNotFound,
                Entity::Schema => ErrorCode::SchemaNotFound,
                Entity::Credential => ErrorCode::CredentialNotFound,
                Entity::CredentialRequest | Entity::ProofRequest => ErrorCode::RequestNotFound,
                Entity::ProofResponse | Entity::StateTransition => ErrorCode::NotFound,
            },
            NodeError::Validation { .. } => ErrorCode::BadRequest,
            NodeError::Forbidden(_) => ErrorCode::Forbidden,
            NodeError::Unauthorized(_) => ErrorCode::Unauthorized,
            NodeError::AlreadyRevoked(_) => ErrorCode::AlreadyRevoked,
            NodeError::Cancelled => ErrorCode::Cancelled,
            NodeError::Storage(e) => storage_code(e),
            NodeError::Schema(e) => match e {
                SchemaError::Validation { .. } => ErrorCode::BadRequest,
                SchemaError::NotFound(_) => ErrorCode::SchemaNotFound,
                SchemaError::AlreadyRevoked(_) => ErrorCode::Conflict,
                SchemaError::Cancelled => ErrorCode::Cancelled,
                SchemaError::Pinning(_) => ErrorCode::PinningFailed,
                SchemaError::Storage(e) => storage_code(e),
                SchemaError::Claim(_) => ErrorCode::BadRequest,
                _ => ErrorCode::InternalServer,
            },
            NodeError::Inputs(e) => match e {
                InputsError::InvalidQuery(_) => ErrorCode::BadRequest,
                InputsError::InvalidSignature => ErrorCode::Unauthorized,
                InputsError::ProofGenerationFailed { .. } | InputsError::MissingAuthClaim(_) => {
                    ErrorCode::ProofGenerationFailed
                }
                _ => ErrorCode::InternalServer,
            },
            NodeError::Identity(e) => match e {
                IdentityError::AlreadyRevoked(_) => ErrorCode::AlreadyRevoked,
                IdentityError::InvalidDid(_) => ErrorCode::BadRequest,
                IdentityError::KeyExists => ErrorCode::Conflict,
                IdentityError::Storage(e) => storage_code(e),
                _ => ErrorCode::InternalServer,
            },
        }
    }

    /// Provider status code when the failure came from the pinning backend.
    pub fn pinning_status(&self) -> Option<u16> {
        match self {
            NodeError::Schema(SchemaError::Pinning(e)) => e.status(),
            _ => None,
        }
    }
}

fn storage_code(err: &StorageError) -> ErrorCode {
    match err {
        StorageError::NotFound(_) => ErrorCode::NotFound,
        StorageError::AlreadyExists(_) | StorageError::InvalidTransition { .. } => ErrorCode::Conflict,
        StorageError::ForbiddenColumn { .. } => ErrorCode::BadRequest,
        StorageError::Timeout => ErrorCode::Timeout,
        _ => ErrorCode::InternalServer,
    }
}

impl DeadlockAware for NodeError {
    fn is_deadlock(&self) -> bool {
        match self {
            NodeError::Storage(e)
            | NodeError::Schema(SchemaError::Storage(e))
            | NodeError::Identity(IdentityError::Storage(e))
            | NodeError::Inputs(InputsError::Identity(IdentityError::Storage(e))) => e.is_deadlock(),
            _ => false,
        }
    }
}

impl From<PinningError> for NodeError {
    fn from(err: PinningError) -> Self {
        NodeError::Schema(err.into())
    }
}
