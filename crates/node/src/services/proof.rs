//! Prover inputs for holders and verification bookkeeping for verifiers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use idenstate_circuits::{
    atomic_query_v3_mtp, atomic_query_v3_sig, auth_v3, AtomicQueryRequest, AtomicQueryV3Inputs,
    AuthV3Inputs, Operator, ProofType, Query, QueryNonces,
};
use idenstate_core::field::fr_from_decimal;
use idenstate_core::{Fr, PrivateKey};
use idenstate_store::{
    credential, in_transaction, requests, statistic, storage_error, Counter, PgNodeStore, ProofRequest,
    ProofResponse, RequestStatus, Role,
};

use super::{cancellable, find_identity, lock_identity, require_role, restore_state, uuid_field};
use crate::context::AppContext;
use crate::error::{Entity, NodeError};

/// Circuit named by proof requests.
pub const ATOMIC_QUERY_V3: &str = "credentialAtomicQueryV3";

/// Stored form of a proof request's query:
/// `{"slotIndex": 2, "operator": "GT", "values": ["19900101"]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub slot_index: usize,
    pub operator: Operator,
    /// Decimal field elements.
    pub values: Vec<String>,
}

impl QuerySpec {
    pub fn to_query(&self) -> Result<Query, NodeError> {
        let values = self
            .values
            .iter()
            .map(|v| fr_from_decimal(v).map_err(|e| NodeError::validation("query.values", e.to_string())))
            .collect::<Result<Vec<Fr>, _>>()?;
        let query = Query::new(self.slot_index, self.operator, values);
        query.validate()?;
        Ok(query)
    }

    pub fn from_value(value: &Value) -> Result<Self, NodeError> {
        serde_json::from_value(value.clone()).map_err(|e| NodeError::validation("query", e.to_string()))
    }
}

/// A holder's answer to a proof request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub response: ProofResponse,
    pub inputs: AtomicQueryV3Inputs,
}

/// Assemble `AtomicQueryV3` inputs answering `proof_request_id` with one of
/// the holder's credentials, record them as the request's response and
/// complete the request.
pub async fn atomic_query_inputs(
    ctx: &AppContext,
    holder_id: Uuid,
    proof_request_id: Uuid,
    credential_id: Uuid,
    proof_type: ProofType,
    cancel: &CancellationToken,
) -> Result<Submission, NodeError> {
    let submission = cancellable(
        cancel,
        in_transaction(&ctx.pool, "atomic_query_inputs", |conn| {
            Box::pin(async move { submit_locked(conn, holder_id, proof_request_id, credential_id, proof_type).await })
        }),
    )
    .await?;
    info!(
        proof_request_id = %proof_request_id,
        holder_id = %holder_id,
        response_id = %submission.response.id,
        proof_type = ?proof_type,
        "submitted proof inputs"
    );
    Ok(submission)
}

async fn find_proof_request(conn: &mut PgConnection, id: Uuid) -> Result<ProofRequest, NodeError> {
    requests::find_proof_request(conn, id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::ProofRequest, id))
}

async fn submit_locked(
    conn: &mut PgConnection,
    holder_id: Uuid,
    proof_request_id: Uuid,
    credential_id: Uuid,
    proof_type: ProofType,
) -> Result<Submission, NodeError> {
    let request = find_proof_request(&mut *conn, proof_request_id).await?;
    if request.status != RequestStatus::Pending {
        return Err(NodeError::validation(
            "proof_request",
            format!("request {proof_request_id} is {}", request.status),
        ));
    }
    if request.holder_id.is_some_and(|addressed| addressed != holder_id) {
        return Err(NodeError::Forbidden(format!("request {proof_request_id} is addressed to another holder")));
    }
    let holder = find_identity(&mut *conn, holder_id).await?;
    require_role(&holder, Role::Holder)?;

    let record = credential::find_by_id(&mut *conn, credential_id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::Credential, credential_id))?;
    if record.holder_id != holder.id {
        return Err(NodeError::Forbidden(format!("credential {credential_id} is not held by {holder_id}")));
    }
    if let Some(err) = super::credential::unusable(&record) {
        return Err(err);
    }
    if record.schema_id != request.schema_id {
        return Err(NodeError::validation("credential", "credential schema does not match the request"));
    }

    let verifier = find_identity(&mut *conn, request.verifier_id).await?;
    let query = QuerySpec::from_value(&request.query)?.to_query()?;
    let nullifier_session_id =
        fr_from_decimal(&request.challenge).map_err(|e| NodeError::validation("challenge", e.to_string()))?;
    let nonces = QueryNonces {
        verifier_id: verifier.did.id.to_field(),
        nullifier_session_id,
        ..QueryNonces::default()
    };

    // Lock the issuer so its trees do not move while the proofs are taken.
    let issuer = lock_identity(&mut *conn, record.issuer_id).await?;
    let inputs = {
        let mut store = PgNodeStore::new(&mut *conn);
        let state = restore_state(&mut store, &issuer).await?;
        let query_request = AtomicQueryRequest {
            request_id: uuid_field(request.id),
            holder: holder.did.id,
            issuer_id: issuer.did.id,
            claim: &record.claim,
            query,
            nonces,
            timestamp: None,
        };
        match proof_type {
            ProofType::BjjSignature => {
                atomic_query_v3_sig(&mut store, &state, query_request, &record.signature).await?
            }
            ProofType::SparseMerkleTree => atomic_query_v3_mtp(&mut store, &state, query_request).await?,
        }
    };

    let response = ProofResponse {
        id: Uuid::new_v4(),
        proof_request_id: request.id,
        holder_id: holder.id,
        inputs: serde_json::to_value(&inputs)?,
        proof: None,
        verified: None,
        created_at: Utc::now(),
    };
    requests::insert_proof_response(&mut *conn, &response).await?;
    requests::complete_proof_request(&mut *conn, request.id, holder.id).await?;
    statistic::increment(&mut *conn, holder.id, Counter::ProofsSubmitted).await?;
    Ok(Submission { response, inputs })
}

/// Record the prover's output for a response and the verifier's verdict.
/// A response is judged once.
pub async fn record_verification(
    ctx: &AppContext,
    verifier_id: Uuid,
    response_id: Uuid,
    proof: Value,
    verified: bool,
    cancel: &CancellationToken,
) -> Result<ProofResponse, NodeError> {
    let response = cancellable(
        cancel,
        in_transaction(&ctx.pool, "record_verification", |conn| {
            let proof = proof.clone();
            Box::pin(async move { verify_locked(conn, verifier_id, response_id, proof, verified).await })
        }),
    )
    .await?;
    info!(response_id = %response_id, verifier_id = %verifier_id, verified, "recorded verification");
    Ok(response)
}

async fn verify_locked(
    conn: &mut PgConnection,
    verifier_id: Uuid,
    response_id: Uuid,
    proof: Value,
    verified: bool,
) -> Result<ProofResponse, NodeError> {
    let mut response = requests::find_proof_response(&mut *conn, response_id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::ProofResponse, response_id))?;
    let request = find_proof_request(&mut *conn, response.proof_request_id).await?;
    if request.verifier_id != verifier_id {
        return Err(NodeError::Forbidden(format!("request {} belongs to another verifier", request.id)));
    }
    if response.verified.is_some() {
        return Err(NodeError::validation("response", format!("response {response_id} was already verified")));
    }

    requests::record_verification(&mut *conn, response.id, proof.clone(), verified).await?;
    if verified {
        statistic::increment(&mut *conn, verifier_id, Counter::ProofsVerified).await?;
    }
    response.proof = Some(proof);
    response.verified = Some(verified);
    Ok(response)
}

/// `AuthV3` inputs proving control of `identity_id` for `challenge`.
pub async fn auth_v3_inputs(
    ctx: &AppContext,
    identity_id: Uuid,
    key: &PrivateKey,
    challenge: Fr,
) -> Result<AuthV3Inputs, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let record = find_identity(&mut conn, identity_id).await?;
    if key.public() != record.public_key {
        return Err(NodeError::Unauthorized(format!("key does not belong to identity {identity_id}")));
    }
    let mut gist = ctx.gist.snapshot(&mut conn).await?;

    let signature = key.sign_poseidon(challenge)?;
    let mut store = PgNodeStore::new(&mut conn);
    let state = restore_state(&mut store, &record).await?;
    let inputs = auth_v3(&mut store, &state, record.did.id, &mut gist.store, &gist.tree, challenge, &signature).await?;
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_spec_parses_stored_form() {
        let stored = json!({ "slotIndex": 2, "operator": "GT", "values": ["19900101"] });
        let spec = QuerySpec::from_value(&stored).unwrap();
        let query = spec.to_query().unwrap();
        assert_eq!(query.slot_index, 2);
        assert_eq!(query.operator, Operator::Gt);
        assert_eq!(query.values, vec![Fr::from(19_900_101u64)]);
    }

    #[test]
    fn test_query_spec_parses_inclusive_operators() {
        let leq = json!({ "slotIndex": 2, "operator": "LEQ", "values": ["1"] });
        let query = QuerySpec::from_value(&leq).unwrap().to_query().unwrap();
        assert_eq!(query.operator, Operator::Leq);
        assert_eq!(query.operator.code(), 7);

        let neq = json!({ "slotIndex": 6, "operator": "NEQ", "values": ["0"] });
        assert_eq!(QuerySpec::from_value(&neq).unwrap().operator, Operator::Neq);
    }

    #[test]
    fn test_query_spec_rejections() {
        let not_decimal = QuerySpec { slot_index: 2, operator: Operator::Eq, values: vec!["0x10".into()] };
        assert!(matches!(not_decimal.to_query(), Err(NodeError::Validation { .. })));

        let header_slot = QuerySpec { slot_index: 0, operator: Operator::Eq, values: vec!["1".into()] };
        assert!(matches!(header_slot.to_query(), Err(NodeError::Inputs(_))));

        let unknown_operator = json!({ "slotIndex": 2, "operator": "LIKE", "values": ["1"] });
        assert!(QuerySpec::from_value(&unknown_operator).is_err());
    }
}
