//! Credential and proof request lifecycles.
//!
//! Requests start `Pending` and move once to a terminal status. A
//! credential request completes when the issuer fulfils it; a proof request
//! completes when a holder submits inputs for it (see
//! [`super::proof::atomic_query_inputs`]).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use idenstate_core::field::fr_to_decimal;
use idenstate_core::{PrivateKey, StorageError};
use idenstate_store::{
    in_transaction, requests, statistic, storage_error, Counter, CredentialRequest, ProofRequest, ProofResponse,
    RequestStatus, Role,
};

use super::credential::{issue_locked, IssueRequest, Issued};
use super::proof::{QuerySpec, ATOMIC_QUERY_V3};
use super::{cancellable, find_identity, random_field, require_role};
use crate::context::AppContext;
use crate::error::{Entity, NodeError};

fn request_error(entity: Entity, id: Uuid) -> impl FnOnce(StorageError) -> NodeError {
    move |e| match e {
        StorageError::NotFound(_) => NodeError::not_found(entity, id),
        other => other.into(),
    }
}

fn require_closing_status(status: RequestStatus) -> Result<(), NodeError> {
    if !status.is_terminal() || status == RequestStatus::Completed {
        return Err(NodeError::validation("status", format!("{status} does not close a request")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Credential requests
// ---------------------------------------------------------------------------

/// A holder asks `issuer_id` for a credential under `schema_id`.
pub async fn request_credential(
    ctx: &AppContext,
    holder_id: Uuid,
    issuer_id: Uuid,
    schema_id: Uuid,
    subject: Map<String, Value>,
) -> Result<CredentialRequest, NodeError> {
    let schema = super::schema::get(ctx, schema_id).await?;
    if !schema.is_active() {
        return Err(NodeError::validation("schema", format!("schema {schema_id} is revoked")));
    }

    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let holder = find_identity(&mut conn, holder_id).await?;
    require_role(&holder, Role::Holder)?;
    let issuer = find_identity(&mut conn, issuer_id).await?;
    require_role(&issuer, Role::Issuer)?;
    if schema.issuer_did != issuer.did {
        return Err(NodeError::validation("schema", format!("schema {schema_id} is not issued by {issuer_id}")));
    }

    let now = Utc::now();
    let request = CredentialRequest {
        id: Uuid::new_v4(),
        holder_id,
        issuer_id,
        schema_id,
        subject: Value::Object(subject),
        status: RequestStatus::Pending,
        credential_id: None,
        reason: None,
        created_at: now,
        updated_at: now,
    };
    requests::insert_credential_request(&mut conn, &request).await?;
    info!(request_id = %request.id, holder_id = %holder_id, issuer_id = %issuer_id, "credential requested");
    Ok(request)
}

pub async fn get_credential_request(ctx: &AppContext, id: Uuid) -> Result<CredentialRequest, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    requests::find_credential_request(&mut conn, id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::CredentialRequest, id))
}

/// Requests addressed to an issuer, optionally only those in `status`.
pub async fn list_credential_requests(
    ctx: &AppContext,
    issuer_id: Uuid,
    status: Option<RequestStatus>,
) -> Result<Vec<CredentialRequest>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    Ok(requests::list_credential_requests(&mut conn, issuer_id, status).await?)
}

/// Issue the requested credential and complete the request, atomically.
pub async fn fulfil_credential_request(
    ctx: &AppContext,
    key: &PrivateKey,
    request_id: Uuid,
    expiration: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
) -> Result<Issued, NodeError> {
    let pending = get_credential_request(ctx, request_id).await?;
    let subject = match &pending.subject {
        Value::Object(map) => map.clone(),
        _ => return Err(NodeError::validation("subject", "credential subject must be an object")),
    };
    let issue = IssueRequest {
        issuer_id: pending.issuer_id,
        holder_id: pending.holder_id,
        schema_id: pending.schema_id,
        subject,
        expiration,
    };
    let schema = Arc::new(super::schema::get(ctx, pending.schema_id).await?);

    let issued = cancellable(
        cancel,
        in_transaction(&ctx.pool, "fulfil_credential_request", |conn| {
            let key = key.clone();
            let issue = issue.clone();
            let schema = Arc::clone(&schema);
            let contexts = Arc::clone(&ctx.documents);
            Box::pin(async move {
                let issued = issue_locked(&mut *conn, &key, &issue, &schema, &contexts).await?;
                requests::complete_credential_request(&mut *conn, request_id, issued.credential.id)
                    .await
                    .map_err(request_error(Entity::CredentialRequest, request_id))?;
                Ok(issued)
            })
        }),
    )
    .await?;
    info!(request_id = %request_id, credential_id = %issued.credential.id, "credential request fulfilled");
    Ok(issued)
}

/// Close a pending credential request without issuing. The issuer may
/// fail or expire it; the holder may cancel it.
pub async fn close_credential_request(
    ctx: &AppContext,
    actor_id: Uuid,
    request_id: Uuid,
    status: RequestStatus,
    reason: Option<String>,
) -> Result<CredentialRequest, NodeError> {
    require_closing_status(status)?;
    let mut request = get_credential_request(ctx, request_id).await?;
    let allowed = match status {
        RequestStatus::Cancelled => actor_id == request.holder_id,
        _ => actor_id == request.issuer_id,
    };
    if !allowed {
        return Err(NodeError::Forbidden(format!("{actor_id} may not move request {request_id} to {status}")));
    }

    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    requests::close_credential_request(&mut conn, request_id, status, reason.as_deref())
        .await
        .map_err(request_error(Entity::CredentialRequest, request_id))?;
    request.status = status;
    request.reason = reason;
    info!(request_id = %request_id, status = %status, "credential request closed");
    Ok(request)
}

// ---------------------------------------------------------------------------
// Proof requests
// ---------------------------------------------------------------------------

/// A verifier asks for a proof of `query` over a credential of `schema_id`,
/// optionally from one specific holder. The challenge is a fresh random
/// field element.
pub async fn create_proof_request(
    ctx: &AppContext,
    verifier_id: Uuid,
    schema_id: Uuid,
    holder_id: Option<Uuid>,
    query: QuerySpec,
    cancel: &CancellationToken,
) -> Result<ProofRequest, NodeError> {
    query.to_query()?;
    let schema = super::schema::get(ctx, schema_id).await?;
    if !schema.is_active() {
        return Err(NodeError::validation("schema", format!("schema {schema_id} is revoked")));
    }
    let query = serde_json::to_value(&query)?;

    let request = cancellable(
        cancel,
        in_transaction(&ctx.pool, "create_proof_request", |conn| {
            let query = query.clone();
            Box::pin(async move { insert_proof_request(conn, verifier_id, schema_id, holder_id, query).await })
        }),
    )
    .await?;
    info!(request_id = %request.id, verifier_id = %verifier_id, schema_id = %schema_id, "proof requested");
    Ok(request)
}

async fn insert_proof_request(
    conn: &mut PgConnection,
    verifier_id: Uuid,
    schema_id: Uuid,
    holder_id: Option<Uuid>,
    query: Value,
) -> Result<ProofRequest, NodeError> {
    let verifier = find_identity(&mut *conn, verifier_id).await?;
    require_role(&verifier, Role::Verifier)?;
    if let Some(holder_id) = holder_id {
        let holder = find_identity(&mut *conn, holder_id).await?;
        require_role(&holder, Role::Holder)?;
    }

    let now = Utc::now();
    let request = ProofRequest {
        id: Uuid::new_v4(),
        verifier_id,
        holder_id,
        schema_id,
        circuit_id: ATOMIC_QUERY_V3.to_string(),
        query,
        challenge: fr_to_decimal(&random_field()),
        status: RequestStatus::Pending,
        reason: None,
        created_at: now,
        updated_at: now,
    };
    requests::insert_proof_request(&mut *conn, &request).await?;
    statistic::increment(&mut *conn, verifier_id, Counter::ProofRequestsCreated).await?;
    Ok(request)
}

pub async fn get_proof_request(ctx: &AppContext, id: Uuid) -> Result<ProofRequest, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    requests::find_proof_request(&mut conn, id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::ProofRequest, id))
}

pub async fn list_proof_requests(ctx: &AppContext, verifier_id: Uuid) -> Result<Vec<ProofRequest>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    Ok(requests::list_proof_requests(&mut conn, verifier_id).await?)
}

/// Responses submitted for one of the verifier's requests.
pub async fn list_proof_responses(
    ctx: &AppContext,
    verifier_id: Uuid,
    proof_request_id: Uuid,
) -> Result<Vec<ProofResponse>, NodeError> {
    let request = get_proof_request(ctx, proof_request_id).await?;
    if request.verifier_id != verifier_id {
        return Err(NodeError::Forbidden(format!("request {proof_request_id} belongs to another verifier")));
    }
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    Ok(requests::list_proof_responses(&mut conn, proof_request_id).await?)
}

/// Close a pending proof request. Only its verifier may do so.
pub async fn close_proof_request(
    ctx: &AppContext,
    verifier_id: Uuid,
    request_id: Uuid,
    status: RequestStatus,
    reason: Option<String>,
) -> Result<ProofRequest, NodeError> {
    require_closing_status(status)?;
    let mut request = get_proof_request(ctx, request_id).await?;
    if request.verifier_id != verifier_id {
        return Err(NodeError::Forbidden(format!("request {request_id} belongs to another verifier")));
    }

    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    requests::close_proof_request(&mut conn, request_id, status, reason.as_deref())
        .await
        .map_err(request_error(Entity::ProofRequest, request_id))?;
    request.status = status;
    request.reason = reason;
    info!(request_id = %request_id, status = %status, "proof request closed");
    Ok(request)
}
