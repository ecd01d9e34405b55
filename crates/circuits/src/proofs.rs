//! Proof fetching shared by the assemblers.

use idenstate_core::{Claim, IdentityState, NodeStore, TreeState};

use crate::error::InputsError;
use crate::marshal::{claim_label, MtProof};

/// An identity's auth claim with its proofs at one tree state.
pub struct AuthProofs {
    pub claim: Claim,
    pub inclusion: MtProof,
    pub non_revocation: MtProof,
}

/// Inclusion and non-revocation of `identity`'s auth claim at `at`.
pub async fn auth_claim_proofs<S: NodeStore + ?Sized>(
    store: &mut S,
    identity: &IdentityState,
    at: &TreeState,
) -> Result<AuthProofs, InputsError> {
    let claim = identity.auth_claim()?;

    let inclusion = identity.inclusion_proof_at(store, &claim, &at.claims_root).await?;
    if !inclusion.existence {
        return Err(InputsError::MissingAuthClaim(
            "auth claim is not in the claims tree".into(),
        ));
    }
    let non_revocation = identity
        .non_revocation_proof_at(store, claim.revocation_nonce(), &at.revocation_root)
        .await?;
    if non_revocation.existence {
        return Err(InputsError::MissingAuthClaim("auth claim is revoked".into()));
    }

    Ok(AuthProofs {
        claim,
        inclusion: MtProof::new(inclusion, *at),
        non_revocation: MtProof::new(non_revocation, *at),
    })
}

/// Non-revocation proof for `claim` in `issuer`'s revocation tree at `at`.
pub async fn claim_non_revocation<S: NodeStore + ?Sized>(
    store: &mut S,
    issuer: &IdentityState,
    claim: &Claim,
    at: &TreeState,
) -> Result<MtProof, InputsError> {
    let proof = issuer
        .non_revocation_proof_at(store, claim.revocation_nonce(), &at.revocation_root)
        .await?;
    if proof.existence {
        return Err(InputsError::ProofGenerationFailed {
            claim: claim_label(claim),
            reason: format!("revocation nonce {} is revoked", claim.revocation_nonce()),
        });
    }
    Ok(MtProof::new(proof, *at))
}
