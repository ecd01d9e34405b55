//! JSON blocks shared by every circuit's inputs.
//!
//! Field elements are decimal strings and proof siblings are padded to the
//! tree depth, so the output can be handed to the prover unchanged.

use serde::{Deserialize, Serialize};

use idenstate_core::field::{self, fr_to_decimal};
use idenstate_core::{Claim, Fr, Id, Proof, Signature, TreeState};

use crate::error::InputsError;

/// A Merkle proof together with the tree state it was taken against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtProof {
    pub proof: Proof,
    pub tree_state: TreeState,
}

impl MtProof {
    pub fn new(proof: Proof, tree_state: TreeState) -> Self {
        Self { proof, tree_state }
    }

    /// Placeholder used where a circuit input is present but unused.
    pub fn empty(levels: usize) -> Self {
        Self {
            proof: Proof::empty(levels),
            tree_state: TreeState::zero(),
        }
    }
}

/// EdDSA signature as circuit signals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureJson {
    #[serde(with = "field::decimal")]
    pub r8x: Fr,
    #[serde(with = "field::decimal")]
    pub r8y: Fr,
    #[serde(with = "field::decimal")]
    pub s: Fr,
}

impl From<&Signature> for SignatureJson {
    fn from(sig: &Signature) -> Self {
        Self {
            r8x: sig.r8.x,
            r8y: sig.r8.y,
            s: sig.s_field(),
        }
    }
}

/// Serde adapter: a claim as its eight slots in decimal.
pub mod claim_slots {
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    use idenstate_core::Claim;

    pub fn serialize<S: Serializer>(claim: &Claim, serializer: S) -> Result<S::Ok, S::Error> {
        claim.to_decimal_strings().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Claim, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        Claim::from_decimal_strings(&raw).map_err(D::Error::custom)
    }
}

/// Serialize an identifier as the decimal value circuits see.
pub(crate) fn id_decimal<S: serde::Serializer>(id: &Id, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&fr_to_decimal(&id.to_field()))
}

/// Serialize a flag as the decimal string `"1"` or `"0"`.
pub(crate) fn flag_decimal<S: serde::Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *flag { "1" } else { "0" })
}

/// Canonical byte form of a set of inputs.
pub fn to_bytes<T: Serialize>(inputs: &T) -> Result<Vec<u8>, InputsError> {
    Ok(serde_json::to_vec(inputs)?)
}

/// Short identifier of a claim for error messages.
pub(crate) fn claim_label(claim: &Claim) -> String {
    claim
        .hash_index()
        .map(|hi| fr_to_decimal(&hi))
        .unwrap_or_else(|_| format!("nonce {}", claim.revocation_nonce()))
}
