//! Persistence contract for schema records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use idenstate_core::{SchemaHash, StorageError};

use crate::model::{SchemaRecord, SchemaStatus};

/// Schema records keyed by public id. The attribute list is written in the
/// same atomic unit as the schema row.
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    async fn insert(&self, record: &SchemaRecord) -> Result<(), StorageError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SchemaRecord>, StorageError>;

    async fn find_by_hash(&self, hash: &SchemaHash) -> Result<Option<SchemaRecord>, StorageError>;

    /// All schemas, newest first, optionally restricted to one issuer DID.
    async fn list(&self, issuer_did: Option<&str>) -> Result<Vec<SchemaRecord>, StorageError>;

    async fn mark_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError>;
}

/// In-process repository for tests and tooling.
#[derive(Debug, Default)]
pub struct MemorySchemaRepository {
    records: RwLock<Vec<SchemaRecord>>,
}

impl MemorySchemaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SchemaRepository for MemorySchemaRepository {
    async fn insert(&self, record: &SchemaRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StorageError::AlreadyExists(format!("schema {}", record.id)));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SchemaRecord>, StorageError> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_hash(&self, hash: &SchemaHash) -> Result<Option<SchemaRecord>, StorageError> {
        Ok(self.records.read().await.iter().find(|r| &r.hash == hash).cloned())
    }

    async fn list(&self, issuer_did: Option<&str>) -> Result<Vec<SchemaRecord>, StorageError> {
        let records = self.records.read().await;
        let mut out: Vec<SchemaRecord> = records
            .iter()
            .filter(|r| issuer_did.map_or(true, |did| r.issuer_did.to_string() == did))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn mark_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("schema {id}")))?;
        record.status = SchemaStatus::Revoked;
        record.revoked_at = Some(at);
        Ok(())
    }
}
