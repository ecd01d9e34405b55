//! Credential requests, proof requests and proof responses.
//!
//! Request status moves once, from `pending` to a terminal status. Status
//! changes read the current row `FOR UPDATE` and reject any other move.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use idenstate_core::StorageError;

use crate::error::storage_error;
use crate::fields::{self, FieldMap, FieldValue, Updatable};
use crate::models::{CredentialRequest, ProofRequest, ProofResponse, RequestStatus};

const CREDENTIAL_REQUEST_COLUMNS: &str =
    "id, holder_id, issuer_id, schema_id, subject, status, credential_id, reason, created_at, updated_at";

const PROOF_REQUEST_COLUMNS: &str =
    "id, verifier_id, holder_id, schema_id, circuit_id, query, challenge, status, reason, created_at, updated_at";

const PROOF_RESPONSE_COLUMNS: &str = "id, proof_request_id, holder_id, inputs, proof, verified, created_at";

#[derive(sqlx::FromRow)]
struct CredentialRequestRow {
    id: Uuid,
    holder_id: Uuid,
    issuer_id: Uuid,
    schema_id: Uuid,
    subject: serde_json::Value,
    status: String,
    credential_id: Option<Uuid>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CredentialRequestRow {
    fn into_record(self) -> Result<CredentialRequest, StorageError> {
        Ok(CredentialRequest {
            id: self.id,
            holder_id: self.holder_id,
            issuer_id: self.issuer_id,
            schema_id: self.schema_id,
            subject: self.subject,
            status: self.status.parse()?,
            credential_id: self.credential_id,
            reason: self.reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProofRequestRow {
    id: Uuid,
    verifier_id: Uuid,
    holder_id: Option<Uuid>,
    schema_id: Uuid,
    circuit_id: String,
    query: serde_json::Value,
    challenge: String,
    status: String,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProofRequestRow {
    fn into_record(self) -> Result<ProofRequest, StorageError> {
        Ok(ProofRequest {
            id: self.id,
            verifier_id: self.verifier_id,
            holder_id: self.holder_id,
            schema_id: self.schema_id,
            circuit_id: self.circuit_id,
            query: self.query,
            challenge: self.challenge,
            status: self.status.parse()?,
            reason: self.reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProofResponseRow {
    id: Uuid,
    proof_request_id: Uuid,
    holder_id: Uuid,
    inputs: serde_json::Value,
    proof: Option<serde_json::Value>,
    verified: Option<bool>,
    created_at: DateTime<Utc>,
}

impl ProofResponseRow {
    fn into_record(self) -> ProofResponse {
        ProofResponse {
            id: self.id,
            proof_request_id: self.proof_request_id,
            holder_id: self.holder_id,
            inputs: self.inputs,
            proof: self.proof,
            verified: self.verified,
            created_at: self.created_at,
        }
    }
}

/// Lock the row and validate `current -> next`.
async fn lock_status(
    conn: &mut PgConnection,
    target: Updatable,
    id: Uuid,
    next: RequestStatus,
) -> Result<(), StorageError> {
    let current: Option<String> =
        sqlx::query_scalar(&format!("SELECT status FROM {} WHERE id = $1 FOR UPDATE", target.table))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage_error)?;
    let current: RequestStatus = current
        .ok_or_else(|| StorageError::NotFound(format!("{} {id}", target.table)))?
        .parse()?;
    if !current.can_transition_to(next) {
        return Err(StorageError::InvalidTransition {
            table: target.table.to_string(),
            from: current.to_string(),
            to: next.to_string(),
        });
    }
    Ok(())
}

async fn transition(
    conn: &mut PgConnection,
    target: Updatable,
    id: Uuid,
    next: RequestStatus,
    mut extra: FieldMap,
) -> Result<(), StorageError> {
    lock_status(&mut *conn, target, id, next).await?;
    extra.insert(0, ("status", next.as_str().into()));
    fields::update_fields(conn, target, id, &extra).await?;
    Ok(())
}

fn reason_field(reason: Option<&str>) -> FieldValue {
    reason.map_or(FieldValue::Null, FieldValue::from)
}

// ---------------------------------------------------------------------------
// Credential requests
// ---------------------------------------------------------------------------

pub async fn insert_credential_request(
    conn: &mut PgConnection,
    request: &CredentialRequest,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO credential_request (id, holder_id, issuer_id, schema_id, subject, status, credential_id,
                                         reason, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(request.id)
    .bind(request.holder_id)
    .bind(request.issuer_id)
    .bind(request.schema_id)
    .bind(&request.subject)
    .bind(request.status.as_str())
    .bind(request.credential_id)
    .bind(&request.reason)
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

pub async fn find_credential_request(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<CredentialRequest>, StorageError> {
    sqlx::query_as::<_, CredentialRequestRow>(&format!(
        "SELECT {CREDENTIAL_REQUEST_COLUMNS} FROM credential_request WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(storage_error)?
    .map(CredentialRequestRow::into_record)
    .transpose()
}

/// Requests addressed to an issuer, optionally filtered by status.
pub async fn list_credential_requests(
    conn: &mut PgConnection,
    issuer_id: Uuid,
    status: Option<RequestStatus>,
) -> Result<Vec<CredentialRequest>, StorageError> {
    let rows = sqlx::query_as::<_, CredentialRequestRow>(&format!(
        "SELECT {CREDENTIAL_REQUEST_COLUMNS} FROM credential_request
         WHERE issuer_id = $1 AND ($2::TEXT IS NULL OR status = $2)
         ORDER BY created_at"
    ))
    .bind(issuer_id)
    .bind(status.map(RequestStatus::as_str))
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(CredentialRequestRow::into_record).collect()
}

pub async fn complete_credential_request(
    conn: &mut PgConnection,
    id: Uuid,
    credential_id: Uuid,
) -> Result<(), StorageError> {
    transition(
        conn,
        fields::CREDENTIAL_REQUEST,
        id,
        RequestStatus::Completed,
        vec![("credential_id", credential_id.into())],
    )
    .await
}

/// Move a pending credential request to `Failed`, `Expired` or `Cancelled`.
pub async fn close_credential_request(
    conn: &mut PgConnection,
    id: Uuid,
    status: RequestStatus,
    reason: Option<&str>,
) -> Result<(), StorageError> {
    transition(conn, fields::CREDENTIAL_REQUEST, id, status, vec![("reason", reason_field(reason))]).await
}

// ---------------------------------------------------------------------------
// Proof requests
// ---------------------------------------------------------------------------

pub async fn insert_proof_request(conn: &mut PgConnection, request: &ProofRequest) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO proof_request (id, verifier_id, holder_id, schema_id, circuit_id, query, challenge, status,
                                    reason, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(request.id)
    .bind(request.verifier_id)
    .bind(request.holder_id)
    .bind(request.schema_id)
    .bind(&request.circuit_id)
    .bind(&request.query)
    .bind(&request.challenge)
    .bind(request.status.as_str())
    .bind(&request.reason)
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

pub async fn find_proof_request(conn: &mut PgConnection, id: Uuid) -> Result<Option<ProofRequest>, StorageError> {
    sqlx::query_as::<_, ProofRequestRow>(&format!(
        "SELECT {PROOF_REQUEST_COLUMNS} FROM proof_request WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(storage_error)?
    .map(ProofRequestRow::into_record)
    .transpose()
}

pub async fn list_proof_requests(
    conn: &mut PgConnection,
    verifier_id: Uuid,
) -> Result<Vec<ProofRequest>, StorageError> {
    let rows = sqlx::query_as::<_, ProofRequestRow>(&format!(
        "SELECT {PROOF_REQUEST_COLUMNS} FROM proof_request WHERE verifier_id = $1 ORDER BY created_at"
    ))
    .bind(verifier_id)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(ProofRequestRow::into_record).collect()
}

/// Mark a proof request answered by `holder_id`.
pub async fn complete_proof_request(
    conn: &mut PgConnection,
    id: Uuid,
    holder_id: Uuid,
) -> Result<(), StorageError> {
    transition(
        conn,
        fields::PROOF_REQUEST,
        id,
        RequestStatus::Completed,
        vec![("holder_id", holder_id.into())],
    )
    .await
}

pub async fn close_proof_request(
    conn: &mut PgConnection,
    id: Uuid,
    status: RequestStatus,
    reason: Option<&str>,
) -> Result<(), StorageError> {
    transition(conn, fields::PROOF_REQUEST, id, status, vec![("reason", reason_field(reason))]).await
}

// ---------------------------------------------------------------------------
// Proof responses
// ---------------------------------------------------------------------------

pub async fn insert_proof_response(conn: &mut PgConnection, response: &ProofResponse) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO proof_response (id, proof_request_id, holder_id, inputs, proof, verified, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(response.id)
    .bind(response.proof_request_id)
    .bind(response.holder_id)
    .bind(&response.inputs)
    .bind(&response.proof)
    .bind(response.verified)
    .bind(response.created_at)
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

pub async fn find_proof_response(conn: &mut PgConnection, id: Uuid) -> Result<Option<ProofResponse>, StorageError> {
    let row = sqlx::query_as::<_, ProofResponseRow>(&format!(
        "SELECT {PROOF_RESPONSE_COLUMNS} FROM proof_response WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(storage_error)?;
    Ok(row.map(ProofResponseRow::into_record))
}

pub async fn list_proof_responses(
    conn: &mut PgConnection,
    proof_request_id: Uuid,
) -> Result<Vec<ProofResponse>, StorageError> {
    let rows = sqlx::query_as::<_, ProofResponseRow>(&format!(
        "SELECT {PROOF_RESPONSE_COLUMNS} FROM proof_response WHERE proof_request_id = $1 ORDER BY created_at"
    ))
    .bind(proof_request_id)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    Ok(rows.into_iter().map(ProofResponseRow::into_record).collect())
}

/// Record the prover output and the verification verdict.
pub async fn record_verification(
    conn: &mut PgConnection,
    id: Uuid,
    proof: serde_json::Value,
    verified: bool,
) -> Result<(), StorageError> {
    let fields: FieldMap = vec![("proof", proof.into()), ("verified", verified.into())];
    if !fields::update_fields(conn, fields::PROOF_RESPONSE, id, &fields).await? {
        return Err(StorageError::NotFound(format!("proof response {id}")));
    }
    Ok(())
}
