//! `AtomicQueryV3` inputs in signature and MTP mode.
//!
//! Signature mode proves issuance through the issuer's BJJ signature over
//! the claim hash, so the claim's inclusion proof is an empty placeholder
//! and a `signatureProof` block carries the issuer's auth-claim proofs.
//! MTP mode proves issuance by inclusion in the issuer's claims tree and
//! omits the signature block.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use idenstate_core::field;
use idenstate_core::{Claim, Fr, Id, IdentityState, NodeStore, Signature};

use crate::error::InputsError;
use crate::marshal::{claim_label, claim_slots, id_decimal, MtProof, SignatureJson};
use crate::proofs::{auth_claim_proofs, claim_non_revocation};
use crate::query::{Query, QueryJson};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ProofType {
    #[serde(rename = "BJJSignature")]
    BjjSignature,
    #[serde(rename = "Iden3SparseMerkleTree")]
    SparseMerkleTree,
}

/// Optional nonces and verifier binding; all default to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryNonces {
    pub profile_nonce: Fr,
    pub claim_subject_profile_nonce: Fr,
    pub link_nonce: Fr,
    pub verifier_id: Fr,
    pub nullifier_session_id: Fr,
}

/// What a holder asks the prover to show about one claim.
#[derive(Clone, Debug)]
pub struct AtomicQueryRequest<'a> {
    pub request_id: Fr,
    /// Holder's genesis identifier
    pub holder: Id,
    /// Issuer's identifier
    pub issuer_id: Id,
    pub claim: &'a Claim,
    pub query: Query,
    pub nonces: QueryNonces,
    /// Defaults to now
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureProof {
    pub signature: SignatureJson,
    #[serde(with = "claim_slots")]
    pub issuer_auth_claim: Claim,
    pub issuer_auth_inc_proof: MtProof,
    pub issuer_auth_non_rev_proof: MtProof,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimWithProofs {
    #[serde(rename = "issuerID", serialize_with = "id_decimal")]
    pub issuer_id: Id,
    #[serde(with = "claim_slots")]
    pub claim: Claim,
    /// Inclusion in the issuer's claims tree (empty in signature mode)
    pub inc_proof: MtProof,
    /// Revocation status against the issuer's current state
    pub non_rev_proof: MtProof,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_proof: Option<SignatureProof>,
}

/// Marshalled inputs for `credentialAtomicQueryV3`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicQueryV3Inputs {
    #[serde(rename = "requestID", with = "field::decimal")]
    pub request_id: Fr,
    #[serde(rename = "userGenesisID", serialize_with = "id_decimal")]
    pub user_genesis_id: Id,
    #[serde(with = "field::decimal")]
    pub profile_nonce: Fr,
    #[serde(with = "field::decimal")]
    pub claim_subject_profile_nonce: Fr,
    #[serde(with = "field::decimal")]
    pub link_nonce: Fr,
    #[serde(rename = "verifierID", with = "field::decimal")]
    pub verifier_id: Fr,
    #[serde(rename = "nullifierSessionID", with = "field::decimal")]
    pub nullifier_session_id: Fr,
    pub claim: ClaimWithProofs,
    pub query: QueryJson,
    /// Unix seconds
    pub timestamp: i64,
    pub is_revocation_checked: u8,
    #[serde(rename = "isBJJAuthEnabled")]
    pub is_bjj_auth_enabled: u8,
    pub proof_type: ProofType,
}

impl AtomicQueryV3Inputs {
    pub fn to_bytes(&self) -> Result<Vec<u8>, InputsError> {
        crate::marshal::to_bytes(self)
    }
}

/// Checks shared by both modes: query shape, subject, expiry and the
/// queried slot's value.
fn check_request(request: &AtomicQueryRequest<'_>, now: &DateTime<Utc>) -> Result<(), InputsError> {
    request.query.validate()?;
    let claim = request.claim;

    if let Some(subject) = claim.subject_id() {
        if subject != request.holder.to_field() {
            return Err(InputsError::InvalidQuery("claim subject is not the holder".into()));
        }
    }
    if claim.is_expired(now.timestamp().max(0) as u64) {
        return Err(InputsError::ProofGenerationFailed {
            claim: claim_label(claim),
            reason: "claim expired".into(),
        });
    }
    let slot_value = claim.slots()[request.query.slot_index];
    if !request.query.matches(&slot_value) {
        return Err(InputsError::InvalidQuery("claim does not satisfy the query".into()));
    }
    Ok(())
}

fn assemble(
    request: AtomicQueryRequest<'_>,
    now: DateTime<Utc>,
    inc_proof: MtProof,
    non_rev_proof: MtProof,
    signature_proof: Option<SignatureProof>,
    proof_type: ProofType,
) -> AtomicQueryV3Inputs {
    AtomicQueryV3Inputs {
        request_id: request.request_id,
        user_genesis_id: request.holder,
        profile_nonce: request.nonces.profile_nonce,
        claim_subject_profile_nonce: request.nonces.claim_subject_profile_nonce,
        link_nonce: request.nonces.link_nonce,
        verifier_id: request.nonces.verifier_id,
        nullifier_session_id: request.nonces.nullifier_session_id,
        claim: ClaimWithProofs {
            issuer_id: request.issuer_id,
            claim: request.claim.clone(),
            inc_proof,
            non_rev_proof,
            signature_proof,
        },
        query: QueryJson::from(&request.query),
        timestamp: now.timestamp(),
        is_revocation_checked: 1,
        is_bjj_auth_enabled: 0,
        proof_type,
    }
}

/// Signature mode: `signature` is the issuer's signature over the claim hash.
pub async fn atomic_query_v3_sig<S: NodeStore + ?Sized>(
    store: &mut S,
    issuer: &IdentityState,
    request: AtomicQueryRequest<'_>,
    signature: &Signature,
) -> Result<AtomicQueryV3Inputs, InputsError> {
    let now = request.timestamp.unwrap_or_else(Utc::now);
    check_request(&request, &now)?;

    let claim_hash = request.claim.hash()?;
    if !issuer.public_key().verify_poseidon(claim_hash, signature) {
        return Err(InputsError::InvalidSignature);
    }

    let tree_state = issuer.tree_state()?;
    let auth = auth_claim_proofs(store, issuer, &tree_state).await?;
    let non_rev_proof = claim_non_revocation(store, issuer, request.claim, &tree_state).await?;

    let signature_proof = SignatureProof {
        signature: SignatureJson::from(signature),
        issuer_auth_claim: auth.claim,
        issuer_auth_inc_proof: auth.inclusion,
        issuer_auth_non_rev_proof: auth.non_revocation,
    };
    debug!(issuer = %request.issuer_id, "assembled AtomicQueryV3 (signature) inputs");

    let levels = issuer.depth();
    Ok(assemble(
        request,
        now,
        MtProof::empty(levels),
        non_rev_proof,
        Some(signature_proof),
        ProofType::BjjSignature,
    ))
}

/// MTP mode: the claim must be in the issuer's claims tree at its current state.
pub async fn atomic_query_v3_mtp<S: NodeStore + ?Sized>(
    store: &mut S,
    issuer: &IdentityState,
    request: AtomicQueryRequest<'_>,
) -> Result<AtomicQueryV3Inputs, InputsError> {
    let now = request.timestamp.unwrap_or_else(Utc::now);
    check_request(&request, &now)?;

    let tree_state = issuer.tree_state()?;
    let proof = issuer.inclusion_proof(store, request.claim).await?;
    let (hi, hv) = request.claim.hi_hv()?;
    if !proof.existence || !proof.verify(&tree_state.claims_root, &hi, &hv)? {
        return Err(InputsError::ProofGenerationFailed {
            claim: claim_label(request.claim),
            reason: "claim is not in the issuer's claims tree".into(),
        });
    }
    let non_rev_proof = claim_non_revocation(store, issuer, request.claim, &tree_state).await?;
    debug!(issuer = %request.issuer_id, "assembled AtomicQueryV3 (mtp) inputs");

    Ok(assemble(
        request,
        now,
        MtProof::new(proof, tree_state),
        non_rev_proof,
        None,
        ProofType::SparseMerkleTree,
    ))
}
