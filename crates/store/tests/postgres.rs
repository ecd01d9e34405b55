//! Repository tests against a live PostgreSQL.
//!
//! Skipped unless DATABASE_URL points at a disposable database:
//!   DATABASE_URL=postgres://postgres@localhost/idenstate_test cargo test -p idenstate-store

use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use idenstate_core::{
    Blockchain, Claim, ClaimOption, DidMethod, IdentityState, Network, PrivateKey, SchemaHash, StorageError, TreeState,
};
use idenstate_store::{
    credential, fields, identity, in_transaction, requests, state_transition, statistic, Counter, Credential,
    CredentialRequest, CredentialStatus, Identity, PgNodeStore, RequestStatus, Role, StateTransition,
};

async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping");
            return None;
        }
    };
    let pool = idenstate_store::connect_url(&url, 4).await.unwrap();
    idenstate_store::migrate(&pool).await.unwrap();
    Some(pool)
}

fn fresh_key() -> PrivateKey {
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    seed[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    PrivateKey::from_seed(&seed).unwrap()
}

/// Create an identity's trees, its row and its genesis log entry.
async fn enrol(pool: &PgPool, key: &PrivateKey, role: Role) -> (Identity, IdentityState) {
    let mut conn = pool.acquire().await.unwrap();
    let mut tx = sqlx::Connection::begin(&mut *conn).await.unwrap();
    let state = {
        let mut store = PgNodeStore::new(&mut *tx);
        IdentityState::create(&mut store, key.public(), 16).await.unwrap()
    };
    let now = Utc::now();
    let record = Identity {
        id: Uuid::new_v4(),
        did: state.did(DidMethod::PolygonId, Blockchain::Polygon, Network::Amoy).unwrap(),
        role,
        public_key: key.public(),
        state: state.state_value().unwrap(),
        handles: state.handles(),
        created_at: now,
        updated_at: now,
    };
    identity::insert(&mut *tx, &record).await.unwrap();
    let genesis = StateTransition {
        id: Uuid::new_v4(),
        identity_id: record.id,
        old: TreeState::zero(),
        new: state.tree_state().unwrap(),
        is_genesis: true,
        tx_hash: None,
        block_number: None,
        created_at: now,
        published_at: None,
    };
    state_transition::append(&mut *tx, &genesis).await.unwrap();
    tx.commit().await.unwrap();
    (record, state)
}

#[tokio::test]
async fn test_tree_survives_reload() {
    let Some(pool) = test_pool().await else { return };
    let key = fresh_key();
    let (record, state) = enrol(&pool, &key, Role::Issuer).await;

    let mut conn = pool.acquire().await.unwrap();
    let loaded = identity::find_by_did(&mut conn, &record.did).await.unwrap().unwrap();
    assert_eq!(loaded, Identity { created_at: loaded.created_at, updated_at: loaded.updated_at, ..record.clone() });

    let mut store = PgNodeStore::new(&mut conn);
    let restored = IdentityState::restore(&mut store, key.public(), loaded.handles).await.unwrap();
    assert_eq!(restored.state_value().unwrap(), state.state_value().unwrap());

    // the auth claim proves against the persisted tree
    let auth = restored.auth_claim().unwrap();
    let proof = restored.inclusion_proof(&mut store, &auth).await.unwrap();
    assert!(proof.existence);
}

#[tokio::test]
async fn test_state_log_rejects_fork() {
    let Some(pool) = test_pool().await else { return };
    let (record, state) = enrol(&pool, &fresh_key(), Role::Issuer).await;
    let mut conn = pool.acquire().await.unwrap();

    let genesis_state = state.tree_state().unwrap();
    let next = TreeState::new(genesis_state.claims_root, genesis_state.claims_root, genesis_state.root_of_roots).unwrap();
    let entry = |old: TreeState| StateTransition {
        id: Uuid::new_v4(),
        identity_id: record.id,
        old,
        new: next,
        is_genesis: false,
        tx_hash: None,
        block_number: None,
        created_at: Utc::now(),
        published_at: None,
    };

    state_transition::append(&mut conn, &entry(genesis_state)).await.unwrap();
    let err = state_transition::append(&mut conn, &entry(genesis_state)).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransition { .. }));

    let log = state_transition::list(&mut conn, record.id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log[0].is_genesis);
    assert_eq!(log[1].old.state, log[0].new.state);

    let tail = state_transition::latest(&mut conn, record.id).await.unwrap().unwrap();
    state_transition::mark_published(&mut conn, tail.id, "0xabc", Some(7), Utc::now()).await.unwrap();
    let pending = state_transition::pending(&mut conn, 1000).await.unwrap();
    assert!(pending.iter().all(|t| t.id != tail.id));
}

#[tokio::test]
async fn test_nonce_allocation_and_revocation_status() {
    let Some(pool) = test_pool().await else { return };
    let key = fresh_key();
    let (issuer, _) = enrol(&pool, &key, Role::Issuer).await;
    let (holder, _) = enrol(&pool, &fresh_key(), Role::Holder).await;

    let schema_id = insert_schema_row(&pool, &issuer).await;
    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(credential::next_revocation_nonce(&mut conn, issuer.id).await.unwrap(), 2);

    let claim = Claim::new([
        ClaimOption::SchemaHash(SchemaHash([7; 16])),
        ClaimOption::RevocationNonce(2),
    ])
    .unwrap();
    let (hi, hv) = claim.hi_hv().unwrap();
    let now = Utc::now();
    let cred = Credential {
        id: Uuid::new_v4(),
        issuer_id: issuer.id,
        holder_id: holder.id,
        schema_id,
        claim: claim.clone(),
        hash_index: hi,
        hash_value: hv,
        subject: serde_json::json!({"birthday": 19900101}),
        revocation_nonce: 2,
        expiration: None,
        signature: key.sign_poseidon(idenstate_core::poseidon::hash_two(hi, hv).unwrap()).unwrap(),
        mtp_proof: None,
        issuer_state: issuer.state,
        status: CredentialStatus::Active,
        created_at: now,
        updated_at: now,
    };
    credential::insert(&mut conn, &cred).await.unwrap();
    assert_eq!(credential::next_revocation_nonce(&mut conn, issuer.id).await.unwrap(), 3);

    // the nonce is unique per issuer
    let dup = Credential { id: Uuid::new_v4(), ..cred.clone() };
    assert!(matches!(credential::insert(&mut conn, &dup).await, Err(StorageError::AlreadyExists(_))));

    credential::set_status(&mut conn, cred.id, CredentialStatus::Revoked).await.unwrap();
    let stored = credential::find_by_nonce(&mut conn, issuer.id, 2).await.unwrap().unwrap();
    assert_eq!(stored.status, CredentialStatus::Revoked);
    assert_eq!(stored.claim, claim);

    let forbidden: fields::FieldMap = vec![("revocation_nonce", 9i64.into())];
    assert!(matches!(
        credential::update_fields(&mut conn, cred.id, &forbidden).await,
        Err(StorageError::ForbiddenColumn { .. })
    ));

    statistic::increment(&mut conn, issuer.id, Counter::CredentialsIssued).await.unwrap();
    statistic::increment(&mut conn, issuer.id, Counter::CredentialsIssued).await.unwrap();
    let stats = statistic::get(&mut conn, issuer.id, Role::Issuer).await.unwrap();
    assert_eq!(stats.get(Counter::CredentialsIssued), 2);
    assert_eq!(stats.get(Counter::SchemasCreated), 0);
}

#[tokio::test]
async fn test_request_moves_once() {
    let Some(pool) = test_pool().await else { return };
    let (issuer, _) = enrol(&pool, &fresh_key(), Role::Issuer).await;
    let (holder, _) = enrol(&pool, &fresh_key(), Role::Holder).await;
    let schema_id = insert_schema_row(&pool, &issuer).await;

    let now = Utc::now();
    let request = CredentialRequest {
        id: Uuid::new_v4(),
        holder_id: holder.id,
        issuer_id: issuer.id,
        schema_id,
        subject: serde_json::json!({}),
        status: RequestStatus::Pending,
        credential_id: None,
        reason: None,
        created_at: now,
        updated_at: now,
    };
    let mut conn = pool.acquire().await.unwrap();
    requests::insert_credential_request(&mut conn, &request).await.unwrap();
    requests::close_credential_request(&mut conn, request.id, RequestStatus::Cancelled, Some("holder withdrew"))
        .await
        .unwrap();

    let err = requests::close_credential_request(&mut conn, request.id, RequestStatus::Failed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransition { .. }));

    let stored = requests::find_credential_request(&mut conn, request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Cancelled);
    assert_eq!(stored.reason.as_deref(), Some("holder withdrew"));
}

#[tokio::test]
async fn test_failed_transaction_leaves_no_nodes() {
    let Some(pool) = test_pool().await else { return };
    let key = fresh_key();
    let created = Arc::new(Mutex::new(None));

    let result: Result<(), StorageError> = in_transaction(&pool, "test", |conn| {
        let key = key.clone();
        let created = Arc::clone(&created);
        Box::pin(async move {
            let mut store = PgNodeStore::new(conn);
            let state = IdentityState::create(&mut store, key.public(), 16)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            *created.lock().unwrap() = Some(state.handles().claims_mt_id);
            Err(StorageError::Backend("abort".into()))
        })
    })
    .await;
    assert!(result.is_err());

    let tree_id = created.lock().unwrap().expect("trees were created before the abort");
    let mut conn = pool.acquire().await.unwrap();
    let nodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mt_node WHERE tree_id = $1")
        .bind(tree_id as i64)
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(nodes, 0);
}

async fn insert_schema_row(pool: &PgPool, issuer: &Identity) -> Uuid {
    let id = Uuid::new_v4();
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&Uuid::new_v4().as_bytes()[..]);
    sqlx::query(
        "INSERT INTO schema (id, issuer_did, title, version, type_name, is_merklized, json_schema, jsonld_context,
                             schema_cid, context_cid, schema_url, context_url, hash, status)
         VALUES ($1, $2, 'KYC', '1.0.0', 'KYCAgeCredential', false, '{}', '{}', 'Qm1', 'Qm2', 'u1', 'u2', $3,
                 'active')",
    )
    .bind(id)
    .bind(issuer.did.to_string())
    .bind(SchemaHash(hash).to_hex())
    .execute(pool)
    .await
    .unwrap();
    id
}
