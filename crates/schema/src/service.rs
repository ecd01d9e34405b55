//! Schema lifecycle: create (generate, pin, persist), read, revoke.
//!
//! Creation pins the JSON-Schema first and the JSON-LD context second. A
//! record is written only once both CIDs are known; if the second pin or
//! the insert fails, the CIDs pinned so far are unpinned again.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use idenstate_core::SchemaHash;

use crate::builder::SchemaBuilder;
use crate::documents::{json_schema, jsonld_context, to_pinned_bytes};
use crate::error::{PinningError, SchemaError};
use crate::hash::schema_hash;
use crate::model::{SchemaRecord, SchemaStatus};
use crate::pinning::PinningClient;
use crate::repository::SchemaRepository;

/// HTTP status a backend answers for a CID it no longer holds.
const NOT_PINNED: u16 = 404;

#[derive(Clone)]
pub struct SchemaService {
    pinning: Arc<dyn PinningClient>,
    repository: Arc<dyn SchemaRepository>,
}

impl SchemaService {
    pub fn new(pinning: Arc<dyn PinningClient>, repository: Arc<dyn SchemaRepository>) -> Self {
        Self { pinning, repository }
    }

    /// Validate, generate both documents, pin them and persist the record.
    pub async fn create(&self, builder: SchemaBuilder, cancel: &CancellationToken) -> Result<SchemaRecord, SchemaError> {
        let draft = builder.build()?;
        let id = Uuid::new_v4();
        let schema_doc = json_schema(&draft);
        let context_doc = jsonld_context(&draft, id);
        let schema_bytes = to_pinned_bytes(&schema_doc)?;
        let context_bytes = to_pinned_bytes(&context_doc)?;
        let file_stem = format!("{}-{}", draft.type_name, draft.version);

        let schema_pin = cancellable(cancel, self.pinning.pin(&format!("{file_stem}.json"), schema_bytes)).await?;
        let context_pin = match cancellable(cancel, self.pinning.pin(&format!("{file_stem}.jsonld"), context_bytes)).await
        {
            Ok(pin) => pin,
            Err(e) => {
                self.rollback(&[schema_pin.cid.as_str()]).await;
                return Err(e);
            }
        };

        let schema_url = self.pinning.gateway_url(&schema_pin.cid);
        let context_url = self.pinning.gateway_url(&context_pin.cid);
        let record = SchemaRecord {
            id,
            issuer_did: draft.issuer_did,
            title: draft.title,
            description: draft.description,
            version: draft.version,
            type_name: draft.type_name,
            is_merklized: draft.is_merklized,
            attributes: draft.attributes,
            json_schema: schema_doc,
            jsonld_context: context_doc,
            schema_cid: schema_pin.cid,
            context_cid: context_pin.cid,
            schema_url,
            hash: schema_hash(&context_url),
            context_url,
            status: SchemaStatus::Active,
            created_at: Utc::now(),
            revoked_at: None,
        };

        if let Err(e) = self.repository.insert(&record).await {
            self.rollback(&[record.schema_cid.as_str(), record.context_cid.as_str()]).await;
            return Err(e.into());
        }
        info!(
            schema_id = %record.id,
            schema_type = %record.type_name,
            hash = %record.hash,
            "created schema"
        );
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<SchemaRecord, SchemaError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| SchemaError::NotFound(id.to_string()))
    }

    pub async fn get_by_hash(&self, hash: &SchemaHash) -> Result<SchemaRecord, SchemaError> {
        self.repository
            .find_by_hash(hash)
            .await?
            .ok_or_else(|| SchemaError::NotFound(hash.to_hex()))
    }

    pub async fn list(&self, issuer_did: Option<&str>) -> Result<Vec<SchemaRecord>, SchemaError> {
        Ok(self.repository.list(issuer_did).await?)
    }

    /// Unpin both documents, then mark the schema revoked. The status is left
    /// untouched if unpinning fails. When the context cannot be unpinned after
    /// the schema document was, the schema document is pinned again from the
    /// stored copy so an active record never points at a dropped CID.
    pub async fn revoke(&self, id: Uuid, cancel: &CancellationToken) -> Result<SchemaRecord, SchemaError> {
        let mut record = self.get(id).await?;
        if record.status == SchemaStatus::Revoked {
            return Err(SchemaError::AlreadyRevoked(id.to_string()));
        }

        self.unpin_tolerant(&record.schema_cid, cancel).await?;
        if let Err(e) = self.unpin_tolerant(&record.context_cid, cancel).await {
            self.repin_schema(&record).await;
            return Err(e);
        }

        let now = Utc::now();
        self.repository.mark_revoked(id, now).await?;
        record.status = SchemaStatus::Revoked;
        record.revoked_at = Some(now);
        info!(schema_id = %id, "revoked schema");
        Ok(record)
    }

    async fn unpin_tolerant(&self, cid: &str, cancel: &CancellationToken) -> Result<(), SchemaError> {
        match cancellable(cancel, self.pinning.unpin(cid)).await {
            Ok(()) => Ok(()),
            Err(SchemaError::Pinning(e)) if e.status() == Some(NOT_PINNED) => {
                warn!(cid = %cid, "document was already unpinned");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn repin_schema(&self, record: &SchemaRecord) {
        let bytes = match to_pinned_bytes(&record.json_schema) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(schema_id = %record.id, error = %e, "cannot serialize schema document for re-pin");
                return;
            }
        };
        let name = format!("{}-{}.json", record.type_name, record.version);
        match self.pinning.pin(&name, bytes).await {
            Ok(pin) if pin.cid == record.schema_cid => {
                info!(schema_id = %record.id, cid = %pin.cid, "re-pinned schema document");
            }
            Ok(pin) => {
                warn!(schema_id = %record.id, expected = %record.schema_cid, cid = %pin.cid, "re-pinned schema document under a different CID");
            }
            Err(e) => {
                warn!(schema_id = %record.id, cid = %record.schema_cid, error = %e, "schema document left unpinned");
            }
        }
    }

    async fn rollback(&self, cids: &[&str]) {
        for cid in cids {
            if let Err(e) = self.pinning.unpin(cid).await {
                warn!(cid = %cid, error = %e, "failed to unpin orphaned document");
            }
        }
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, SchemaError>
where
    F: Future<Output = Result<T, PinningError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SchemaError::Cancelled),
        res = fut => Ok(res?),
    }
}
