//! State Transition inputs for anchoring an identity's new state.
//!
//! Proves a legal `old_state -> new_state` move signed by the identity's
//! auth key.
//!
//! Inputs:
//! - userID: the identity's genesis identifier
//! - oldTreeState / newTreeState: roots and state before and after
//! - isOldStateGenesis: whether the old state is the genesis state
//! - authClaim with its inclusion and non-revocation proofs at the old state
//! - newAuthClaimMtp: auth-claim inclusion at the new claims root
//! - signature over `Poseidon(old_state, new_state)`

use serde::Serialize;
use tracing::debug;

use idenstate_core::poseidon::hash_two;
use idenstate_core::{Claim, Fr, Id, IdentityState, NodeStore, PrivateKey, Signature, TreeState};

use crate::error::InputsError;
use crate::marshal::{claim_slots, flag_decimal, id_decimal, MtProof, SignatureJson};
use crate::proofs::auth_claim_proofs;

/// Message the auth key signs for a transition.
pub fn transition_message(old_state: &Fr, new_state: &Fr) -> Result<Fr, InputsError> {
    Ok(hash_two(*old_state, *new_state)?)
}

/// Sign the transition `old -> new` with the identity's key.
pub fn sign_transition(
    key: &PrivateKey,
    old: &TreeState,
    new: &TreeState,
) -> Result<Signature, InputsError> {
    let msg = transition_message(&old.state, &new.state)?;
    Ok(key.sign_poseidon(msg)?)
}

/// Marshalled inputs for `stateTransition`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionInputs {
    #[serde(rename = "userID", serialize_with = "id_decimal")]
    pub user_id: Id,
    /// Roots and state before the transition
    pub old_tree_state: TreeState,
    /// Roots and state after the transition
    pub new_tree_state: TreeState,
    #[serde(serialize_with = "flag_decimal")]
    pub is_old_state_genesis: bool,
    #[serde(with = "claim_slots")]
    pub auth_claim: Claim,
    /// Auth claim inclusion at the old claims root
    pub auth_claim_inc_mtp: MtProof,
    /// Auth claim non-revocation at the old revocation root
    pub auth_claim_non_rev_mtp: MtProof,
    /// Auth claim inclusion at the new claims root
    pub new_auth_claim_mtp: MtProof,
    pub signature: SignatureJson,
}

impl StateTransitionInputs {
    pub fn to_bytes(&self) -> Result<Vec<u8>, InputsError> {
        crate::marshal::to_bytes(self)
    }
}

/// Assemble `stateTransition` inputs for `identity`, whose trees must hold
/// both `old` and `new` roots.
pub async fn state_transition<S: NodeStore + ?Sized>(
    store: &mut S,
    identity: &IdentityState,
    user_id: Id,
    old: &TreeState,
    new: &TreeState,
    is_old_state_genesis: bool,
    signature: &Signature,
) -> Result<StateTransitionInputs, InputsError> {
    if !old.is_consistent() || !new.is_consistent() {
        return Err(InputsError::ProofGenerationFailed {
            claim: "auth".into(),
            reason: "tree state does not hash to its state value".into(),
        });
    }
    let msg = transition_message(&old.state, &new.state)?;
    if !identity.public_key().verify_poseidon(msg, signature) {
        return Err(InputsError::InvalidSignature);
    }

    let auth_old = auth_claim_proofs(store, identity, old).await?;
    let auth_new = auth_claim_proofs(store, identity, new).await?;
    debug!(user_id = %user_id, is_old_state_genesis, "assembled StateTransition inputs");

    Ok(StateTransitionInputs {
        user_id,
        old_tree_state: *old,
        new_tree_state: *new,
        is_old_state_genesis,
        auth_claim: auth_old.claim,
        auth_claim_inc_mtp: auth_old.inclusion,
        auth_claim_non_rev_mtp: auth_old.non_revocation,
        new_auth_claim_mtp: auth_new.inclusion,
        signature: SignatureJson::from(signature),
    })
}
