//! Persisted records and their status enums.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use idenstate_core::{Claim, Did, Fr, PublicKey, Signature, StorageError, TreeHandles, TreeState};

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(StorageError::Corrupt(format!(
                        concat!("unknown ", stringify!($name), " {:?}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Immutable role of an identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Holder,
    Issuer,
    Verifier,
}

text_enum!(Role { Holder => "holder", Issuer => "issuer", Verifier => "verifier" });

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Revoked,
    Expired,
}

text_enum!(CredentialStatus { Active => "active", Revoked => "revoked", Expired => "expired" });

/// Status of credential and proof requests.
///
/// Requests start `Pending` and move exactly once to a terminal status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

text_enum!(RequestStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Expired => "expired",
    Cancelled => "cancelled",
});

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        self != RequestStatus::Pending
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        self == RequestStatus::Pending && next.is_terminal()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub did: Did,
    pub role: Role,
    pub public_key: PublicKey,
    /// Current composite state.
    pub state: Fr,
    pub handles: TreeHandles,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub holder_id: Uuid,
    pub schema_id: Uuid,
    pub claim: Claim,
    pub hash_index: Fr,
    pub hash_value: Fr,
    pub subject: serde_json::Value,
    pub revocation_nonce: u64,
    pub expiration: Option<DateTime<Utc>>,
    /// Issuer signature over `Poseidon(hash_index, hash_value)`.
    pub signature: Signature,
    pub mtp_proof: Option<serde_json::Value>,
    /// Issuer state when the credential was issued.
    pub issuer_state: Fr,
    pub status: CredentialStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of an identity's state log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateTransition {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub old: TreeState,
    pub new: TreeState,
    pub is_genesis: bool,
    pub tx_hash: Option<String>,
    pub block_number: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl StateTransition {
    pub fn is_published(&self) -> bool {
        self.tx_hash.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub id: Uuid,
    pub holder_id: Uuid,
    pub issuer_id: Uuid,
    pub schema_id: Uuid,
    pub subject: serde_json::Value,
    pub status: RequestStatus,
    pub credential_id: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    pub id: Uuid,
    pub verifier_id: Uuid,
    pub holder_id: Option<Uuid>,
    pub schema_id: Uuid,
    pub circuit_id: String,
    pub query: serde_json::Value,
    /// Decimal field element the holder signs.
    pub challenge: String,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofResponse {
    pub id: Uuid,
    pub proof_request_id: Uuid,
    pub holder_id: Uuid,
    /// Circuit inputs handed to the prover.
    pub inputs: serde_json::Value,
    pub proof: Option<serde_json::Value>,
    pub verified: Option<bool>,
    pub created_at: DateTime<Utc>,
}
