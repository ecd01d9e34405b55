//! Postgres [`SchemaRepository`].
//!
//! A schema row and its attribute rows are written in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use idenstate_core::{Did, SchemaHash, StorageError};
use idenstate_schema::{Attribute, SchemaRecord, SchemaRepository, SchemaStatus};

use crate::error::{corrupt, storage_error};
use crate::retry::in_transaction;

const COLUMNS: &str = "id, issuer_did, title, description, version, type_name, is_merklized, json_schema, \
                       jsonld_context, schema_cid, context_cid, schema_url, context_url, hash, status, created_at, \
                       revoked_at";

#[derive(sqlx::FromRow)]
struct SchemaRow {
    id: Uuid,
    issuer_did: String,
    title: String,
    description: String,
    version: String,
    type_name: String,
    is_merklized: bool,
    json_schema: serde_json::Value,
    jsonld_context: serde_json::Value,
    schema_cid: String,
    context_cid: String,
    schema_url: String,
    context_url: String,
    hash: String,
    status: String,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl SchemaRow {
    fn into_record(self, attributes: Vec<Attribute>) -> Result<SchemaRecord, StorageError> {
        Ok(SchemaRecord {
            id: self.id,
            issuer_did: Did::parse(&self.issuer_did).map_err(|e| corrupt("issuer did", e))?,
            title: self.title,
            description: self.description,
            version: self.version,
            type_name: self.type_name,
            is_merklized: self.is_merklized,
            attributes,
            json_schema: self.json_schema,
            jsonld_context: self.jsonld_context,
            schema_cid: self.schema_cid,
            context_cid: self.context_cid,
            schema_url: self.schema_url,
            context_url: self.context_url,
            hash: SchemaHash::from_hex(&self.hash).map_err(|e| corrupt("schema hash", e))?,
            status: self.status.parse().map_err(|e| corrupt("schema status", e))?,
            created_at: self.created_at,
            revoked_at: self.revoked_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttributeRow {
    name: String,
    title: String,
    #[sqlx(rename = "type")]
    kind: String,
    description: String,
    required: bool,
    slot: Option<String>,
}

impl AttributeRow {
    fn into_attribute(self) -> Result<Attribute, StorageError> {
        Ok(Attribute {
            name: self.name,
            title: self.title,
            kind: self.kind.parse().map_err(|e| corrupt("attribute type", e))?,
            description: self.description,
            required: self.required,
            slot: self
                .slot
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| corrupt("attribute slot", e))?,
        })
    }
}

async fn insert_schema(conn: &mut PgConnection, record: &SchemaRecord) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO schema (id, issuer_did, title, description, version, type_name, is_merklized, json_schema,
                             jsonld_context, schema_cid, context_cid, schema_url, context_url, hash, status,
                             created_at, revoked_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(record.id)
    .bind(record.issuer_did.to_string())
    .bind(&record.title)
    .bind(&record.description)
    .bind(&record.version)
    .bind(&record.type_name)
    .bind(record.is_merklized)
    .bind(&record.json_schema)
    .bind(&record.jsonld_context)
    .bind(&record.schema_cid)
    .bind(&record.context_cid)
    .bind(&record.schema_url)
    .bind(&record.context_url)
    .bind(record.hash.to_hex())
    .bind(record.status.as_str())
    .bind(record.created_at)
    .bind(record.revoked_at)
    .execute(&mut *conn)
    .await
    .map_err(storage_error)?;

    for (position, attr) in record.attributes.iter().enumerate() {
        let position = i32::try_from(position).map_err(|e| corrupt("attribute position", e))?;
        sqlx::query(
            "INSERT INTO schema_attribute (schema_id, position, name, title, type, description, required, slot)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(position)
        .bind(&attr.name)
        .bind(&attr.title)
        .bind(attr.kind.as_str())
        .bind(&attr.description)
        .bind(attr.required)
        .bind(attr.slot.map(|s| s.as_str()))
        .execute(&mut *conn)
        .await
        .map_err(storage_error)?;
    }
    Ok(())
}

async fn load_attributes(conn: &mut PgConnection, schema_id: Uuid) -> Result<Vec<Attribute>, StorageError> {
    let rows = sqlx::query_as::<_, AttributeRow>(
        "SELECT name, title, type, description, required, slot FROM schema_attribute
         WHERE schema_id = $1 ORDER BY position",
    )
    .bind(schema_id)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(AttributeRow::into_attribute).collect()
}

async fn hydrate(conn: &mut PgConnection, row: SchemaRow) -> Result<SchemaRecord, StorageError> {
    let attributes = load_attributes(conn, row.id).await?;
    row.into_record(attributes)
}

pub struct PgSchemaRepository {
    pool: PgPool,
}

impl PgSchemaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, bind: String) -> Result<Option<SchemaRecord>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        let row = sqlx::query_as::<_, SchemaRow>(&format!("SELECT {COLUMNS} FROM schema WHERE {filter} = $1"))
            .bind(bind)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage_error)?;
        match row {
            Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SchemaRepository for PgSchemaRepository {
    async fn insert(&self, record: &SchemaRecord) -> Result<(), StorageError> {
        in_transaction(&self.pool, "schema.insert", |conn| {
            let record = record.clone();
            Box::pin(async move { insert_schema(conn, &record).await })
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SchemaRecord>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        let row = sqlx::query_as::<_, SchemaRow>(&format!("SELECT {COLUMNS} FROM schema WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage_error)?;
        match row {
            Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_hash(&self, hash: &SchemaHash) -> Result<Option<SchemaRecord>, StorageError> {
        self.find_one("hash", hash.to_hex()).await
    }

    async fn list(&self, issuer_did: Option<&str>) -> Result<Vec<SchemaRecord>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        let rows = sqlx::query_as::<_, SchemaRow>(&format!(
            "SELECT {COLUMNS} FROM schema WHERE ($1::TEXT IS NULL OR issuer_did = $1) ORDER BY created_at DESC"
        ))
        .bind(issuer_did)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(hydrate(&mut conn, row).await?);
        }
        Ok(out)
    }

    async fn mark_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE schema SET status = $1, revoked_at = $2 WHERE id = $3")
            .bind(SchemaStatus::Revoked.as_str())
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("schema {id}")));
        }
        Ok(())
    }
}
