//! Credential issuance and revocation.
//!
//! Issuing allocates the issuer's next revocation nonce, builds the claim
//! from the schema, inserts it into the issuer's claims tree, signs it, and
//! records the credential together with the resulting state transition.
//! Revoking inserts the nonce into the revocation tree. Both run under the
//! issuer's identity lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use idenstate_circuits::MtProof;
use idenstate_core::{PrivateKey, TreeState};
use idenstate_schema::{build_claim, CredentialOptions, DocumentCache, SchemaRecord};
use idenstate_store::{
    credential, identity, in_transaction, state_transition, statistic, storage_error, Counter, Credential,
    CredentialStatus, PgNodeStore, Role, StateTransition,
};

use super::{cancellable, find_identity, lock_identity, require_role, restore_state};
use crate::context::AppContext;
use crate::error::{Entity, NodeError};

/// What to issue, to whom, under which schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub issuer_id: Uuid,
    pub holder_id: Uuid,
    pub schema_id: Uuid,
    /// The `credentialSubject` object.
    pub subject: Map<String, Value>,
    pub expiration: Option<DateTime<Utc>>,
}

/// A credential and the state transition that put it in the claims tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issued {
    pub credential: Credential,
    pub transition: StateTransition,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revoked {
    pub credential: Credential,
    pub transition: StateTransition,
}

fn transition(identity_id: Uuid, old: TreeState, new: TreeState) -> StateTransition {
    StateTransition {
        id: Uuid::new_v4(),
        identity_id,
        old,
        new,
        is_genesis: false,
        tx_hash: None,
        block_number: None,
        created_at: Utc::now(),
        published_at: None,
    }
}

/// Issue a credential signed with `key`, which must be the issuer's key.
pub async fn issue(
    ctx: &AppContext,
    key: &PrivateKey,
    request: IssueRequest,
    cancel: &CancellationToken,
) -> Result<Issued, NodeError> {
    let schema = Arc::new(super::schema::get(ctx, request.schema_id).await?);
    let issued = cancellable(
        cancel,
        in_transaction(&ctx.pool, "issue_credential", |conn| {
            let key = key.clone();
            let request = request.clone();
            let schema = Arc::clone(&schema);
            let contexts = Arc::clone(&ctx.documents);
            Box::pin(async move { issue_locked(conn, &key, &request, &schema, &contexts).await })
        }),
    )
    .await?;

    info!(
        credential_id = %issued.credential.id,
        issuer_id = %issued.credential.issuer_id,
        holder_id = %issued.credential.holder_id,
        nonce = issued.credential.revocation_nonce,
        "issued credential"
    );
    Ok(issued)
}

/// Body of [`issue`], run inside a caller-owned transaction.
pub(crate) async fn issue_locked(
    conn: &mut PgConnection,
    key: &PrivateKey,
    request: &IssueRequest,
    schema: &SchemaRecord,
    contexts: &DocumentCache,
) -> Result<Issued, NodeError> {
    let issuer = lock_identity(&mut *conn, request.issuer_id).await?;
    require_role(&issuer, Role::Issuer)?;
    if key.public() != issuer.public_key {
        return Err(NodeError::Unauthorized(format!("key does not belong to issuer {}", issuer.id)));
    }
    if schema.issuer_did != issuer.did {
        return Err(NodeError::Forbidden(format!("schema {} belongs to {}", schema.id, schema.issuer_did)));
    }
    let holder = find_identity(&mut *conn, request.holder_id).await?;
    require_role(&holder, Role::Holder)?;

    let nonce = credential::next_revocation_nonce(&mut *conn, issuer.id).await?;
    let options = CredentialOptions {
        subject: Some(holder.did.id),
        revocation_nonce: nonce,
        expiration: request.expiration,
        ..CredentialOptions::default()
    };
    let claim = build_claim(schema, &request.subject, &options, contexts).await?;

    let (old, new, proof) = {
        let mut store = PgNodeStore::new(&mut *conn);
        let mut state = restore_state(&mut store, &issuer).await?;
        let old = state.tree_state()?;
        let new = state.add_claim(&mut store, &claim).await?;
        let proof = state.inclusion_proof(&mut store, &claim).await?;
        (old, new, proof)
    };
    let signature = key.sign_poseidon(claim.hash()?)?;
    let (hash_index, hash_value) = claim.hi_hv()?;

    identity::update_state(&mut *conn, issuer.id, &new.state).await?;
    let entry = transition(issuer.id, old, new);
    state_transition::append(&mut *conn, &entry).await?;

    let now = Utc::now();
    let record = Credential {
        id: Uuid::new_v4(),
        issuer_id: issuer.id,
        holder_id: holder.id,
        schema_id: schema.id,
        claim,
        hash_index,
        hash_value,
        subject: Value::Object(request.subject.clone()),
        revocation_nonce: nonce,
        expiration: request.expiration,
        signature,
        mtp_proof: Some(serde_json::to_value(MtProof::new(proof, new))?),
        issuer_state: new.state,
        status: CredentialStatus::Active,
        created_at: now,
        updated_at: now,
    };
    credential::insert(&mut *conn, &record).await?;
    statistic::increment(&mut *conn, issuer.id, Counter::CredentialsIssued).await?;
    statistic::increment(&mut *conn, holder.id, Counter::CredentialsReceived).await?;

    Ok(Issued { credential: record, transition: entry })
}

/// Revoke a credential of `issuer_id`. Revoking twice fails with
/// `AlreadyRevoked`.
pub async fn revoke(
    ctx: &AppContext,
    issuer_id: Uuid,
    credential_id: Uuid,
    cancel: &CancellationToken,
) -> Result<Revoked, NodeError> {
    let revoked = cancellable(
        cancel,
        in_transaction(&ctx.pool, "revoke_credential", |conn| {
            Box::pin(async move { revoke_locked(conn, issuer_id, credential_id).await })
        }),
    )
    .await?;

    info!(
        credential_id = %credential_id,
        issuer_id = %issuer_id,
        nonce = revoked.credential.revocation_nonce,
        "revoked credential"
    );
    Ok(revoked)
}

async fn revoke_locked(conn: &mut PgConnection, issuer_id: Uuid, credential_id: Uuid) -> Result<Revoked, NodeError> {
    let issuer = lock_identity(&mut *conn, issuer_id).await?;
    let mut record = credential::find_by_id(&mut *conn, credential_id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::Credential, credential_id))?;
    if record.issuer_id != issuer.id {
        return Err(NodeError::Forbidden(format!("credential {credential_id} was not issued by {issuer_id}")));
    }
    if record.status == CredentialStatus::Revoked {
        return Err(NodeError::AlreadyRevoked(record.revocation_nonce));
    }

    let (old, new) = {
        let mut store = PgNodeStore::new(&mut *conn);
        let mut state = restore_state(&mut store, &issuer).await?;
        let old = state.tree_state()?;
        let new = state.revoke_nonce(&mut store, record.revocation_nonce).await?;
        (old, new)
    };

    identity::update_state(&mut *conn, issuer.id, &new.state).await?;
    let entry = transition(issuer.id, old, new);
    state_transition::append(&mut *conn, &entry).await?;
    credential::set_status(&mut *conn, record.id, CredentialStatus::Revoked).await?;
    statistic::increment(&mut *conn, issuer.id, Counter::CredentialsRevoked).await?;

    record.status = CredentialStatus::Revoked;
    Ok(Revoked { credential: record, transition: entry })
}

pub async fn get(ctx: &AppContext, id: Uuid) -> Result<Credential, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    credential::find_by_id(&mut conn, id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::Credential, id))
}

/// Credentials held by `holder_id`, newest first.
pub async fn list_held(ctx: &AppContext, holder_id: Uuid) -> Result<Vec<Credential>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    Ok(credential::list_by_holder(&mut conn, holder_id).await?)
}

/// Credentials issued by `issuer_id`, by revocation nonce.
pub async fn list_issued(ctx: &AppContext, issuer_id: Uuid) -> Result<Vec<Credential>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    Ok(credential::list_by_issuer(&mut conn, issuer_id).await?)
}

/// Mark active credentials of `holder_id` whose expiration has passed.
pub async fn expire_due(ctx: &AppContext, holder_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let mut expired = Vec::new();
    for record in credential::list_by_holder(&mut conn, holder_id).await? {
        let due = record.expiration.is_some_and(|exp| exp <= now);
        if record.status == CredentialStatus::Active && due {
            credential::set_status(&mut conn, record.id, CredentialStatus::Expired).await?;
            expired.push(record.id);
        }
    }
    Ok(expired)
}

/// Error for a credential that exists but cannot back a proof.
pub(crate) fn unusable(record: &Credential) -> Option<NodeError> {
    match record.status {
        CredentialStatus::Active => None,
        CredentialStatus::Revoked => Some(NodeError::AlreadyRevoked(record.revocation_nonce)),
        CredentialStatus::Expired => Some(NodeError::validation(
            "credential",
            format!("credential {} expired", record.id),
        )),
    }
}
