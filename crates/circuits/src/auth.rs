//! `AuthV3` inputs: ownership of an identity under the global state tree.

use serde::Serialize;
use tracing::debug;

use idenstate_core::field;
use idenstate_core::poseidon::poseidon;
use idenstate_core::{Claim, Fr, Id, IdentityState, NodeStore, Proof, Signature, SparseMerkleTree, TreeState};

use crate::error::InputsError;
use crate::marshal::{claim_slots, id_decimal, MtProof, SignatureJson};
use crate::proofs::auth_claim_proofs;

/// Depth of the on-chain global identity-state tree.
pub const GIST_DEPTH: usize = 64;

/// Key of an identity's leaf in the global identity-state tree.
pub fn gist_key(genesis_id: &Id) -> Result<Fr, InputsError> {
    Ok(poseidon(&[genesis_id.to_field()])?)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GistProof {
    #[serde(with = "field::decimal")]
    pub root: Fr,
    pub proof: Proof,
}

/// Marshalled inputs for `authV3`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthV3Inputs {
    #[serde(rename = "genesisID", serialize_with = "id_decimal")]
    pub genesis_id: Id,
    #[serde(with = "field::decimal")]
    pub profile_nonce: Fr,
    #[serde(with = "claim_slots")]
    pub auth_claim: Claim,
    pub auth_claim_inc_mtp: MtProof,
    pub auth_claim_non_rev_mtp: MtProof,
    pub tree_state: TreeState,
    pub gist_proof: GistProof,
    pub signature: SignatureJson,
    #[serde(with = "field::decimal")]
    pub challenge: Fr,
}

impl AuthV3Inputs {
    pub fn to_bytes(&self) -> Result<Vec<u8>, InputsError> {
        crate::marshal::to_bytes(self)
    }
}

/// Assemble `AuthV3` inputs. `signature` is the identity's signature over
/// `challenge`; `gist` is read through `gist_store`.
pub async fn auth_v3<S, G>(
    store: &mut S,
    identity: &IdentityState,
    genesis_id: Id,
    gist_store: &mut G,
    gist: &SparseMerkleTree,
    challenge: Fr,
    signature: &Signature,
) -> Result<AuthV3Inputs, InputsError>
where
    S: NodeStore + ?Sized,
    G: NodeStore + ?Sized,
{
    if !identity.public_key().verify_poseidon(challenge, signature) {
        return Err(InputsError::InvalidSignature);
    }

    let tree_state = identity.tree_state()?;
    let auth = auth_claim_proofs(store, identity, &tree_state).await?;

    let key = gist_key(&genesis_id)?;
    let (proof, _) = gist.generate_proof(gist_store, &key).await?;
    debug!(genesis_id = %genesis_id, in_gist = proof.existence, "assembled AuthV3 inputs");

    Ok(AuthV3Inputs {
        genesis_id,
        profile_nonce: Fr::from(0u64),
        auth_claim: auth.claim,
        auth_claim_inc_mtp: auth.inclusion,
        auth_claim_non_rev_mtp: auth.non_revocation,
        tree_state,
        gist_proof: GistProof { root: gist.root(), proof },
        signature: SignatureJson::from(signature),
        challenge,
    })
}
