//! `credential` table.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use idenstate_core::field::{fr_from_decimal, fr_to_decimal};
use idenstate_core::{Claim, Signature, StorageError};

use crate::error::{corrupt, storage_error};
use crate::fields::{self, FieldMap};
use crate::models::{Credential, CredentialStatus};

const COLUMNS: &str = "id, issuer_id, holder_id, schema_id, hash_index, hash_value, claim, subject, revocation_nonce, \
                       expiration, signature, mtp_proof, issuer_state, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    issuer_id: Uuid,
    holder_id: Uuid,
    schema_id: Uuid,
    hash_index: String,
    hash_value: String,
    claim: serde_json::Value,
    subject: serde_json::Value,
    revocation_nonce: i64,
    expiration: Option<DateTime<Utc>>,
    signature: String,
    mtp_proof: Option<serde_json::Value>,
    issuer_state: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CredentialRow {
    fn into_record(self) -> Result<Credential, StorageError> {
        let slots: Vec<String> = serde_json::from_value(self.claim).map_err(|e| corrupt("claim", e))?;
        Ok(Credential {
            id: self.id,
            issuer_id: self.issuer_id,
            holder_id: self.holder_id,
            schema_id: self.schema_id,
            claim: Claim::from_decimal_strings(&slots).map_err(|e| corrupt("claim", e))?,
            hash_index: fr_from_decimal(&self.hash_index).map_err(|e| corrupt("hash index", e))?,
            hash_value: fr_from_decimal(&self.hash_value).map_err(|e| corrupt("hash value", e))?,
            subject: self.subject,
            revocation_nonce: u64::try_from(self.revocation_nonce).map_err(|e| corrupt("revocation nonce", e))?,
            expiration: self.expiration,
            signature: Signature::from_hex(&self.signature).map_err(|e| corrupt("signature", e))?,
            mtp_proof: self.mtp_proof,
            issuer_state: fr_from_decimal(&self.issuer_state).map_err(|e| corrupt("issuer state", e))?,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn nonce_param(nonce: u64) -> Result<i64, StorageError> {
    i64::try_from(nonce).map_err(|e| corrupt("revocation nonce", e))
}

pub async fn insert(conn: &mut PgConnection, credential: &Credential) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO credential (id, issuer_id, holder_id, schema_id, hash_index, hash_value, claim, subject,
                                 revocation_nonce, expiration, signature, mtp_proof, issuer_state, status,
                                 created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(credential.id)
    .bind(credential.issuer_id)
    .bind(credential.holder_id)
    .bind(credential.schema_id)
    .bind(fr_to_decimal(&credential.hash_index))
    .bind(fr_to_decimal(&credential.hash_value))
    .bind(serde_json::Value::from(credential.claim.to_decimal_strings()))
    .bind(&credential.subject)
    .bind(nonce_param(credential.revocation_nonce)?)
    .bind(credential.expiration)
    .bind(credential.signature.to_hex())
    .bind(&credential.mtp_proof)
    .bind(fr_to_decimal(&credential.issuer_state))
    .bind(credential.status.as_str())
    .bind(credential.created_at)
    .bind(credential.updated_at)
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Credential>, StorageError> {
    sqlx::query_as::<_, CredentialRow>(&format!("SELECT {COLUMNS} FROM credential WHERE id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(storage_error)?
        .map(CredentialRow::into_record)
        .transpose()
}

pub async fn find_by_nonce(
    conn: &mut PgConnection,
    issuer_id: Uuid,
    nonce: u64,
) -> Result<Option<Credential>, StorageError> {
    sqlx::query_as::<_, CredentialRow>(&format!(
        "SELECT {COLUMNS} FROM credential WHERE issuer_id = $1 AND revocation_nonce = $2"
    ))
    .bind(issuer_id)
    .bind(nonce_param(nonce)?)
    .fetch_optional(conn)
    .await
    .map_err(storage_error)?
    .map(CredentialRow::into_record)
    .transpose()
}

pub async fn list_by_holder(conn: &mut PgConnection, holder_id: Uuid) -> Result<Vec<Credential>, StorageError> {
    let rows = sqlx::query_as::<_, CredentialRow>(&format!(
        "SELECT {COLUMNS} FROM credential WHERE holder_id = $1 ORDER BY created_at DESC"
    ))
    .bind(holder_id)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(CredentialRow::into_record).collect()
}

pub async fn list_by_issuer(conn: &mut PgConnection, issuer_id: Uuid) -> Result<Vec<Credential>, StorageError> {
    let rows = sqlx::query_as::<_, CredentialRow>(&format!(
        "SELECT {COLUMNS} FROM credential WHERE issuer_id = $1 ORDER BY revocation_nonce"
    ))
    .bind(issuer_id)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(CredentialRow::into_record).collect()
}

/// Next unused revocation nonce of `issuer_id`.
///
/// Only sound while the issuer's identity lock is held. Nonce 1 belongs to
/// the auth claim, so the first credential gets 2.
pub async fn next_revocation_nonce(conn: &mut PgConnection, issuer_id: Uuid) -> Result<u64, StorageError> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(revocation_nonce) FROM credential WHERE issuer_id = $1")
        .bind(issuer_id)
        .fetch_one(conn)
        .await
        .map_err(storage_error)?;
    let max = u64::try_from(max.unwrap_or(0)).map_err(|e| corrupt("revocation nonce", e))?;
    Ok(max.max(idenstate_core::identity::AUTH_CLAIM_NONCE) + 1)
}

pub async fn set_status(conn: &mut PgConnection, id: Uuid, status: CredentialStatus) -> Result<(), StorageError> {
    let fields: FieldMap = vec![("status", status.as_str().into())];
    if !update_fields(conn, id, &fields).await? {
        return Err(StorageError::NotFound(format!("credential {id}")));
    }
    Ok(())
}

pub async fn update_fields(conn: &mut PgConnection, id: Uuid, fields: &FieldMap) -> Result<bool, StorageError> {
    fields::update_fields(conn, fields::CREDENTIAL, id, fields).await
}
