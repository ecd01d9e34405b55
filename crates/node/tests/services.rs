//! Service tests against a live PostgreSQL with an in-process pinning backend.
//!
//! Skipped unless DATABASE_URL points at a disposable database:
//!   DATABASE_URL=postgres://postgres@localhost/idenstate_test cargo test -p idenstate-node

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use idenstate_circuits::{Operator, ProofType};
use idenstate_core::{hash_elems, Fr, PrivateKey};
use idenstate_node::services::credential::{self, IssueRequest, Issued};
use idenstate_node::services::proof::{self, QuerySpec};
use idenstate_node::services::{identity, requests, schema, transition};
use idenstate_node::{AppContext, Config, ErrorCode};
use idenstate_schema::{
    Attribute, AttributeType, PinnedFile, PinningClient, PinningError, SchemaBuilder, SchemaRecord, SlotTag,
};
use idenstate_store::{Counter, CredentialStatus, Identity, RequestStatus, Role};

struct FakePinning;

#[async_trait]
impl PinningClient for FakePinning {
    async fn pin(&self, _name: &str, content: Vec<u8>) -> Result<PinnedFile, PinningError> {
        Ok(PinnedFile {
            cid: format!("bafy{}", Uuid::new_v4().simple()),
            size: content.len() as u64,
            timestamp: String::new(),
        })
    }

    async fn unpin(&self, _cid: &str) -> Result<(), PinningError> {
        Ok(())
    }

    fn gateway_url(&self, cid: &str) -> String {
        format!("https://gw.test/ipfs/{cid}")
    }
}

async fn test_context() -> Option<AppContext> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping");
            return None;
        }
    };
    let pool = idenstate_store::connect_url(&url, 4).await.unwrap();
    idenstate_store::migrate(&pool).await.unwrap();
    Some(AppContext::from_parts(Config::default(), pool, Arc::new(FakePinning)).unwrap())
}

fn fresh_key() -> PrivateKey {
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    seed[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    PrivateKey::from_seed(&seed).unwrap()
}

async fn enrol(ctx: &AppContext, role: Role) -> (Identity, PrivateKey) {
    let key = fresh_key();
    let record = identity::enrol(ctx, key.public(), role, &CancellationToken::new()).await.unwrap();
    (record, key)
}

async fn kyc_schema(ctx: &AppContext, issuer: &Identity) -> SchemaRecord {
    let builder = SchemaBuilder::new("", "KYCAgeCredential", "1.0.0")
        .attribute(Attribute::new("birthday", AttributeType::Integer).required().slot(SlotTag::IndexSlotA));
    schema::create(ctx, issuer.id, builder, &CancellationToken::new()).await.unwrap()
}

fn subject(birthday: u64) -> Map<String, Value> {
    match json!({ "birthday": birthday }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

async fn issue(ctx: &AppContext, key: &PrivateKey, issuer: &Identity, holder: &Identity, schema: &SchemaRecord) -> Issued {
    let request = IssueRequest {
        issuer_id: issuer.id,
        holder_id: holder.id,
        schema_id: schema.id,
        subject: subject(19_900_101),
        expiration: None,
    };
    credential::issue(ctx, key, request, &CancellationToken::new()).await.unwrap()
}

#[tokio::test]
async fn test_enrol_records_genesis_state() {
    let Some(ctx) = test_context().await else { return };
    let (record, key) = enrol(&ctx, Role::Issuer).await;

    assert!(record.did.to_string().starts_with("did:polygonid:polygon:amoy:"));
    let (_, state) = identity::load_state(&ctx, record.id).await.unwrap();
    assert_ne!(state.claims_root(), Fr::from(0u64));
    assert_eq!(
        record.state,
        hash_elems(state.claims_root(), state.revocation_root(), state.roots_root()).unwrap()
    );

    let history = transition::history(&ctx, record.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_genesis);
    assert_eq!(history[0].new.state, record.state);

    let found = identity::find_by_did(&ctx, &record.did.to_string()).await.unwrap();
    assert_eq!(found.id, record.id);

    let err = identity::enrol(&ctx, key.public(), Role::Holder, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
}

#[tokio::test]
async fn test_cancelled_enrol_leaves_nothing() {
    let Some(ctx) = test_context().await else { return };
    let key = fresh_key();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = identity::enrol(&ctx, key.public(), Role::Holder, &cancel).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);

    // The same key enrols cleanly afterwards.
    identity::enrol(&ctx, key.public(), Role::Holder, &CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_issue_and_revoke() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, issuer_key) = enrol(&ctx, Role::Issuer).await;
    let (holder, _) = enrol(&ctx, Role::Holder).await;
    let schema = kyc_schema(&ctx, &issuer).await;

    let first = issue(&ctx, &issuer_key, &issuer, &holder, &schema).await;
    let cred = &first.credential;
    assert_eq!(cred.claim.slots()[2], Fr::from(19_900_101u64));
    assert_eq!(cred.claim.revocation_nonce(), cred.revocation_nonce);
    assert_eq!(first.transition.old.state, issuer.state);
    assert_eq!(cred.issuer_state, first.transition.new.state);
    assert!(cred.mtp_proof.is_some());

    let second = issue(&ctx, &issuer_key, &issuer, &holder, &schema).await;
    assert_eq!(second.credential.revocation_nonce, cred.revocation_nonce + 1);
    assert_eq!(second.transition.old.state, first.transition.new.state);

    let revoked = credential::revoke(&ctx, issuer.id, cred.id, &CancellationToken::new()).await.unwrap();
    assert_eq!(revoked.credential.status, CredentialStatus::Revoked);
    assert_ne!(revoked.transition.new.revocation_root, revoked.transition.old.revocation_root);
    assert_eq!(revoked.transition.new.claims_root, revoked.transition.old.claims_root);

    let err = credential::revoke(&ctx, issuer.id, cred.id, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyRevoked);

    let stats = identity::statistics(&ctx, issuer.id).await.unwrap();
    assert_eq!(stats.get(Counter::CredentialsIssued), 2);
    assert_eq!(stats.get(Counter::CredentialsRevoked), 1);
    assert_eq!(stats.get(Counter::SchemasCreated), 1);
    let stats = identity::statistics(&ctx, holder.id).await.unwrap();
    assert_eq!(stats.get(Counter::CredentialsReceived), 2);

    assert_eq!(credential::list_issued(&ctx, issuer.id).await.unwrap().len(), 2);
    assert_eq!(credential::list_held(&ctx, holder.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_issue_rejects_wrong_roles_and_keys() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, issuer_key) = enrol(&ctx, Role::Issuer).await;
    let (holder, holder_key) = enrol(&ctx, Role::Holder).await;
    let (verifier, _) = enrol(&ctx, Role::Verifier).await;
    let schema = kyc_schema(&ctx, &issuer).await;

    let request = IssueRequest {
        issuer_id: issuer.id,
        holder_id: holder.id,
        schema_id: schema.id,
        subject: subject(19_900_101),
        expiration: None,
    };
    let err = credential::issue(&ctx, &holder_key, request.clone(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let to_verifier = IssueRequest { holder_id: verifier.id, ..request.clone() };
    let err = credential::issue(&ctx, &issuer_key, to_verifier, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let missing_birthday = IssueRequest { subject: Map::new(), ..request };
    let err = credential::issue(&ctx, &issuer_key, missing_birthday, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    // Nothing above moved the issuer's state.
    let after = identity::get(&ctx, issuer.id).await.unwrap();
    assert_eq!(after.state, issuer.state);
}

#[tokio::test]
async fn test_transition_inputs_and_publication_order() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, issuer_key) = enrol(&ctx, Role::Issuer).await;
    let (holder, _) = enrol(&ctx, Role::Holder).await;
    let schema = kyc_schema(&ctx, &issuer).await;

    let first = issue(&ctx, &issuer_key, &issuer, &holder, &schema).await.transition;
    let second = issue(&ctx, &issuer_key, &issuer, &holder, &schema).await.transition;

    let inputs = transition::state_transition_inputs(&ctx, &issuer_key, first.id).await.unwrap();
    assert!(inputs.is_old_state_genesis);
    assert_eq!(inputs.old_tree_state, first.old);
    assert_eq!(inputs.new_tree_state, first.new);
    let inputs = transition::state_transition_inputs(&ctx, &issuer_key, second.id).await.unwrap();
    assert!(!inputs.is_old_state_genesis);

    let genesis = transition::history(&ctx, issuer.id).await.unwrap().remove(0);
    let err = transition::state_transition_inputs(&ctx, &issuer_key, genesis.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    let err = transition::state_transition_inputs(&ctx, &fresh_key(), first.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let cancel = CancellationToken::new();
    let err = transition::mark_published(&ctx, second.id, "0xbeef".into(), Some(2), &cancel).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    let err = transition::mark_published(&ctx, genesis.id, "0xbeef".into(), None, &cancel).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    let published = transition::mark_published(&ctx, first.id, "0xcafe".into(), Some(1), &cancel).await.unwrap();
    assert_eq!(published.tx_hash.as_deref(), Some("0xcafe"));
    assert!(published.published_at.is_some());
    let err = transition::mark_published(&ctx, first.id, "0xcafe".into(), Some(1), &cancel).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    transition::mark_published(&ctx, second.id, "0xbeef".into(), Some(2), &cancel).await.unwrap();

    let history = transition::history(&ctx, issuer.id).await.unwrap();
    assert!(history.iter().filter(|t| !t.is_genesis).all(|t| t.is_published()));
}

#[tokio::test]
async fn test_auth_inputs_see_published_state() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, issuer_key) = enrol(&ctx, Role::Issuer).await;
    let (holder, _) = enrol(&ctx, Role::Holder).await;
    let schema = kyc_schema(&ctx, &issuer).await;
    let challenge = Fr::from(42u64);

    let inputs = proof::auth_v3_inputs(&ctx, issuer.id, &issuer_key, challenge).await.unwrap();
    assert_eq!(inputs.challenge, challenge);
    assert!(!inputs.gist_proof.proof.existence);

    let entry = issue(&ctx, &issuer_key, &issuer, &holder, &schema).await.transition;
    transition::mark_published(&ctx, entry.id, "0x01".into(), None, &CancellationToken::new())
        .await
        .unwrap();
    let inputs = proof::auth_v3_inputs(&ctx, issuer.id, &issuer_key, challenge).await.unwrap();
    assert!(inputs.gist_proof.proof.existence);
    assert_eq!(inputs.tree_state.state, entry.new.state);

    let err = proof::auth_v3_inputs(&ctx, issuer.id, &fresh_key(), challenge).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

#[tokio::test]
async fn test_proof_request_flow() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, issuer_key) = enrol(&ctx, Role::Issuer).await;
    let (holder, _) = enrol(&ctx, Role::Holder).await;
    let (verifier, _) = enrol(&ctx, Role::Verifier).await;
    let schema = kyc_schema(&ctx, &issuer).await;
    let cred = issue(&ctx, &issuer_key, &issuer, &holder, &schema).await.credential;
    let cancel = CancellationToken::new();

    let query = QuerySpec { slot_index: 2, operator: Operator::Gt, values: vec!["19800101".into()] };
    let request = requests::create_proof_request(&ctx, verifier.id, schema.id, Some(holder.id), query.clone(), &cancel)
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.circuit_id, proof::ATOMIC_QUERY_V3);

    let submission = proof::atomic_query_inputs(&ctx, holder.id, request.id, cred.id, ProofType::BjjSignature, &cancel)
        .await
        .unwrap();
    assert_eq!(submission.inputs.claim.claim, cred.claim);
    assert!(submission.inputs.claim.signature_proof.is_some());
    assert_eq!(submission.inputs.verifier_id, verifier.did.id.to_field());
    assert_eq!(requests::get_proof_request(&ctx, request.id).await.unwrap().status, RequestStatus::Completed);

    let err = proof::atomic_query_inputs(&ctx, holder.id, request.id, cred.id, ProofType::BjjSignature, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    let responses = requests::list_proof_responses(&ctx, verifier.id, request.id).await.unwrap();
    assert_eq!(responses.len(), 1);
    let judged = proof::record_verification(&ctx, verifier.id, submission.response.id, json!({ "pi_a": [] }), true, &cancel)
        .await
        .unwrap();
    assert_eq!(judged.verified, Some(true));
    let err = proof::record_verification(&ctx, verifier.id, submission.response.id, json!({}), false, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    // The Merkle-proof mode answers an open request too.
    let open = requests::create_proof_request(&ctx, verifier.id, schema.id, None, query, &cancel).await.unwrap();
    let submission = proof::atomic_query_inputs(&ctx, holder.id, open.id, cred.id, ProofType::SparseMerkleTree, &cancel)
        .await
        .unwrap();
    assert!(submission.inputs.claim.inc_proof.proof.existence);
    assert!(submission.inputs.claim.signature_proof.is_none());

    let stats = identity::statistics(&ctx, verifier.id).await.unwrap();
    assert_eq!(stats.get(Counter::ProofRequestsCreated), 2);
    assert_eq!(stats.get(Counter::ProofsVerified), 1);
    let stats = identity::statistics(&ctx, holder.id).await.unwrap();
    assert_eq!(stats.get(Counter::ProofsSubmitted), 2);
}

#[tokio::test]
async fn test_revoked_or_expired_credentials_cannot_answer() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, issuer_key) = enrol(&ctx, Role::Issuer).await;
    let (holder, _) = enrol(&ctx, Role::Holder).await;
    let (verifier, _) = enrol(&ctx, Role::Verifier).await;
    let schema = kyc_schema(&ctx, &issuer).await;
    let cancel = CancellationToken::new();
    let query = QuerySpec { slot_index: 2, operator: Operator::Lt, values: vec!["20000101".into()] };

    let revoked = issue(&ctx, &issuer_key, &issuer, &holder, &schema).await.credential;
    credential::revoke(&ctx, issuer.id, revoked.id, &cancel).await.unwrap();
    let request = requests::create_proof_request(&ctx, verifier.id, schema.id, Some(holder.id), query.clone(), &cancel)
        .await
        .unwrap();
    let err = proof::atomic_query_inputs(&ctx, holder.id, request.id, revoked.id, ProofType::BjjSignature, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyRevoked);

    let expiring = credential::issue(
        &ctx,
        &issuer_key,
        IssueRequest {
            issuer_id: issuer.id,
            holder_id: holder.id,
            schema_id: schema.id,
            subject: subject(19_900_101),
            expiration: Some(Utc::now() + Duration::hours(1)),
        },
        &cancel,
    )
    .await
    .unwrap()
    .credential;
    let expired = credential::expire_due(&ctx, holder.id, Utc::now() + Duration::hours(2)).await.unwrap();
    assert_eq!(expired, vec![expiring.id]);
    let err = proof::atomic_query_inputs(&ctx, holder.id, request.id, expiring.id, ProofType::BjjSignature, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    assert_eq!(requests::get_proof_request(&ctx, request.id).await.unwrap().status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_credential_request_lifecycle() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, issuer_key) = enrol(&ctx, Role::Issuer).await;
    let (holder, _) = enrol(&ctx, Role::Holder).await;
    let schema = kyc_schema(&ctx, &issuer).await;
    let cancel = CancellationToken::new();

    let request = requests::request_credential(&ctx, holder.id, issuer.id, schema.id, subject(19_900_101))
        .await
        .unwrap();
    let pending = requests::list_credential_requests(&ctx, issuer.id, Some(RequestStatus::Pending)).await.unwrap();
    assert!(pending.iter().any(|r| r.id == request.id));

    let issued = requests::fulfil_credential_request(&ctx, &issuer_key, request.id, None, &cancel).await.unwrap();
    let done = requests::get_credential_request(&ctx, request.id).await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert_eq!(done.credential_id, Some(issued.credential.id));

    let err = requests::close_credential_request(&ctx, holder.id, request.id, RequestStatus::Cancelled, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);

    let other = requests::request_credential(&ctx, holder.id, issuer.id, schema.id, subject(19_850_505))
        .await
        .unwrap();
    let err = requests::close_credential_request(&ctx, issuer.id, other.id, RequestStatus::Cancelled, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
    let closed = requests::close_credential_request(
        &ctx,
        issuer.id,
        other.id,
        RequestStatus::Failed,
        Some("birthday not verified".into()),
    )
    .await
    .unwrap();
    assert_eq!(closed.status, RequestStatus::Failed);
}

#[tokio::test]
async fn test_schema_ownership() {
    let Some(ctx) = test_context().await else { return };
    let (issuer, _) = enrol(&ctx, Role::Issuer).await;
    let (other, _) = enrol(&ctx, Role::Issuer).await;
    let (holder, _) = enrol(&ctx, Role::Holder).await;
    let cancel = CancellationToken::new();

    let foreign = SchemaBuilder::new(other.did.to_string(), "KYCAgeCredential", "1.0.0")
        .attribute(Attribute::new("birthday", AttributeType::Integer));
    let err = schema::create(&ctx, issuer.id, foreign, &cancel).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let by_holder = SchemaBuilder::new("", "KYCAgeCredential", "1.0.0")
        .attribute(Attribute::new("birthday", AttributeType::Integer));
    let err = schema::create(&ctx, holder.id, by_holder, &cancel).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let record = kyc_schema(&ctx, &issuer).await;
    assert_eq!(record.issuer_did, issuer.did);
    let err = schema::revoke(&ctx, other.id, record.id, &cancel).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
    schema::revoke(&ctx, issuer.id, record.id, &cancel).await.unwrap();

    let err = schema::get(&ctx, Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchemaNotFound);
}
