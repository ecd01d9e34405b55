//! Partial updates from a column/value map, restricted per table to a
//! fixed whitelist of mutable columns.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use idenstate_core::StorageError;

use crate::error::storage_error;

/// A value bound into an update.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Null,
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        FieldValue::Json(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Uuid(v)
    }
}

/// Ordered column/value pairs of one update.
pub type FieldMap = Vec<(&'static str, FieldValue)>;

/// A table that accepts [`update_fields`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Updatable {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    /// Whether the table carries an `updated_at` column.
    pub touches_updated_at: bool,
}

pub const IDENTITY: Updatable = Updatable {
    table: "identity",
    columns: &["state"],
    touches_updated_at: true,
};

pub const CREDENTIAL: Updatable = Updatable {
    table: "credential",
    columns: &["status", "mtp_proof", "issuer_state"],
    touches_updated_at: true,
};

pub const CREDENTIAL_REQUEST: Updatable = Updatable {
    table: "credential_request",
    columns: &["status", "credential_id", "reason"],
    touches_updated_at: true,
};

pub const PROOF_REQUEST: Updatable = Updatable {
    table: "proof_request",
    columns: &["status", "holder_id", "reason"],
    touches_updated_at: true,
};

pub const PROOF_RESPONSE: Updatable = Updatable {
    table: "proof_response",
    columns: &["proof", "verified"],
    touches_updated_at: false,
};

pub const STATE_TRANSITION: Updatable = Updatable {
    table: "state_transition",
    columns: &["tx_hash", "block_number", "published_at"],
    touches_updated_at: false,
};

impl Updatable {
    fn check(&self, fields: &[(&'static str, FieldValue)]) -> Result<(), StorageError> {
        match fields.iter().find(|(col, _)| !self.columns.contains(col)) {
            Some((col, _)) => Err(StorageError::ForbiddenColumn {
                table: self.table.to_string(),
                column: col.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// `UPDATE <table> SET <col> = <value>, ... WHERE id = <id>`.
///
/// Returns whether a row was updated. Columns outside the table's whitelist
/// are rejected before any SQL is issued.
pub async fn update_fields(
    conn: &mut PgConnection,
    target: Updatable,
    id: Uuid,
    fields: &FieldMap,
) -> Result<bool, StorageError> {
    target.check(fields)?;
    if fields.is_empty() {
        return Ok(false);
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("UPDATE {} SET ", target.table));
    {
        let mut set = qb.separated(", ");
        for (col, value) in fields {
            set.push(format!("{col} = "));
            match value {
                FieldValue::Text(v) => set.push_bind_unseparated(v.clone()),
                FieldValue::Int(v) => set.push_bind_unseparated(*v),
                FieldValue::Bool(v) => set.push_bind_unseparated(*v),
                FieldValue::Json(v) => set.push_bind_unseparated(v.clone()),
                FieldValue::Timestamp(v) => set.push_bind_unseparated(*v),
                FieldValue::Uuid(v) => set.push_bind_unseparated(*v),
                FieldValue::Null => set.push_unseparated("NULL"),
            };
        }
        if target.touches_updated_at {
            set.push("updated_at = now()");
        }
    }
    qb.push(" WHERE id = ").push_bind(id);

    let result = qb.build().execute(conn).await.map_err(storage_error)?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist() {
        let ok: FieldMap = vec![("status", "revoked".into())];
        assert!(CREDENTIAL.check(&ok).is_ok());

        let bad: FieldMap = vec![("status", "revoked".into()), ("revocation_nonce", 5i64.into())];
        assert_eq!(
            CREDENTIAL.check(&bad),
            Err(StorageError::ForbiddenColumn {
                table: "credential".into(),
                column: "revocation_nonce".into()
            })
        );

        // DID and role never change
        for col in ["did", "role"] {
            assert!(IDENTITY.check(&vec![(col, "x".into())]).is_err());
        }
    }
}
