//! `identity` table.
//!
//! Functions take the connection explicitly; pass `&mut *tx` to run them
//! inside an open transaction.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use idenstate_core::field::{fr_from_decimal, fr_to_decimal};
use idenstate_core::{Did, Fr, PublicKey, StorageError, TreeHandles};

use crate::error::{corrupt, db_id, storage_error, tree_id_from_db};
use crate::fields::{self, FieldMap};
use crate::models::{Identity, Role};

const COLUMNS: &str = "id, did, role, public_key_x, public_key_y, state, claims_mt_id, rev_mt_id, roots_mt_id, \
                       mt_depth, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    did: String,
    role: String,
    public_key_x: String,
    public_key_y: String,
    state: String,
    claims_mt_id: i64,
    rev_mt_id: i64,
    roots_mt_id: i64,
    mt_depth: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IdentityRow {
    fn into_record(self) -> Result<Identity, StorageError> {
        let x = fr_from_decimal(&self.public_key_x).map_err(|e| corrupt("public key", e))?;
        let y = fr_from_decimal(&self.public_key_y).map_err(|e| corrupt("public key", e))?;
        Ok(Identity {
            id: self.id,
            did: Did::parse(&self.did).map_err(|e| corrupt("did", e))?,
            role: self.role.parse()?,
            public_key: PublicKey::from_coordinates(x, y).map_err(|e| corrupt("public key", e))?,
            state: fr_from_decimal(&self.state).map_err(|e| corrupt("state", e))?,
            handles: TreeHandles {
                claims_mt_id: tree_id_from_db(self.claims_mt_id)?,
                rev_mt_id: tree_id_from_db(self.rev_mt_id)?,
                roots_mt_id: tree_id_from_db(self.roots_mt_id)?,
                depth: usize::try_from(self.mt_depth).map_err(|e| corrupt("tree depth", e))?,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub async fn insert(conn: &mut PgConnection, identity: &Identity) -> Result<(), StorageError> {
    let depth = i32::try_from(identity.handles.depth).map_err(|e| corrupt("tree depth", e))?;
    sqlx::query(
        "INSERT INTO identity (id, did, role, public_key_x, public_key_y, state, claims_mt_id, rev_mt_id,
                               roots_mt_id, mt_depth, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(identity.id)
    .bind(identity.did.to_string())
    .bind(identity.role.as_str())
    .bind(fr_to_decimal(&identity.public_key.x()))
    .bind(fr_to_decimal(&identity.public_key.y()))
    .bind(fr_to_decimal(&identity.state))
    .bind(db_id(identity.handles.claims_mt_id)?)
    .bind(db_id(identity.handles.rev_mt_id)?)
    .bind(db_id(identity.handles.roots_mt_id)?)
    .bind(depth)
    .bind(identity.created_at)
    .bind(identity.updated_at)
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Identity>, StorageError> {
    sqlx::query_as::<_, IdentityRow>(&format!("SELECT {COLUMNS} FROM identity WHERE id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(storage_error)?
        .map(IdentityRow::into_record)
        .transpose()
}

/// Lookup by the business key.
pub async fn find_by_did(conn: &mut PgConnection, did: &Did) -> Result<Option<Identity>, StorageError> {
    sqlx::query_as::<_, IdentityRow>(&format!("SELECT {COLUMNS} FROM identity WHERE did = $1"))
        .bind(did.to_string())
        .fetch_optional(conn)
        .await
        .map_err(storage_error)?
        .map(IdentityRow::into_record)
        .transpose()
}

pub async fn list(
    conn: &mut PgConnection,
    role: Option<Role>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Identity>, StorageError> {
    let rows = sqlx::query_as::<_, IdentityRow>(&format!(
        "SELECT {COLUMNS} FROM identity
         WHERE ($1::TEXT IS NULL OR role = $1)
         ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(role.map(Role::as_str))
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(IdentityRow::into_record).collect()
}

/// Take the per-identity row lock for the rest of the transaction.
///
/// Every mutation of an identity's trees starts here, and reads the state
/// only after the lock is held.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Identity, StorageError> {
    sqlx::query_as::<_, IdentityRow>(&format!("SELECT {COLUMNS} FROM identity WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| StorageError::NotFound(format!("identity {id}")))?
        .into_record()
}

pub async fn update_state(conn: &mut PgConnection, id: Uuid, state: &Fr) -> Result<(), StorageError> {
    let fields: FieldMap = vec![("state", fr_to_decimal(state).into())];
    if !update_fields(conn, id, &fields).await? {
        return Err(StorageError::NotFound(format!("identity {id}")));
    }
    Ok(())
}

pub async fn update_fields(conn: &mut PgConnection, id: Uuid, fields: &FieldMap) -> Result<bool, StorageError> {
    fields::update_fields(conn, fields::IDENTITY, id, fields).await
}
