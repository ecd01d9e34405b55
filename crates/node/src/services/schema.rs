//! Schema creation and revocation on behalf of an issuer.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use idenstate_schema::{SchemaBuilder, SchemaError, SchemaRecord};
use idenstate_store::{statistic, storage_error, Counter, Role};

use super::{find_identity, require_role};
use crate::context::AppContext;
use crate::error::{Entity, NodeError};

/// Create a schema owned by `issuer_id`.
///
/// The builder's issuer DID is taken from the identity; a builder naming a
/// different DID is refused.
pub async fn create(
    ctx: &AppContext,
    issuer_id: Uuid,
    mut builder: SchemaBuilder,
    cancel: &CancellationToken,
) -> Result<SchemaRecord, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let issuer = find_identity(&mut conn, issuer_id).await?;
    require_role(&issuer, Role::Issuer)?;

    let did = issuer.did.to_string();
    if !builder.issuer_did.is_empty() && builder.issuer_did != did {
        return Err(NodeError::Forbidden(format!("schema issuer {} is not {did}", builder.issuer_did)));
    }
    builder.issuer_did = did;

    let record = ctx.schemas.create(builder, cancel).await?;
    statistic::increment(&mut conn, issuer.id, Counter::SchemasCreated).await?;
    Ok(record)
}

pub async fn get(ctx: &AppContext, id: Uuid) -> Result<SchemaRecord, NodeError> {
    ctx.schemas.get(id).await.map_err(|e| match e {
        SchemaError::NotFound(_) => NodeError::not_found(Entity::Schema, id),
        other => other.into(),
    })
}

pub async fn list(ctx: &AppContext, issuer_did: Option<&str>) -> Result<Vec<SchemaRecord>, NodeError> {
    Ok(ctx.schemas.list(issuer_did).await?)
}

/// Revoke a schema. Only its issuer may do so.
pub async fn revoke(
    ctx: &AppContext,
    issuer_id: Uuid,
    schema_id: Uuid,
    cancel: &CancellationToken,
) -> Result<SchemaRecord, NodeError> {
    let schema = get(ctx, schema_id).await?;
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let issuer = find_identity(&mut conn, issuer_id).await?;
    if schema.issuer_did != issuer.did {
        return Err(NodeError::Forbidden(format!("schema {schema_id} belongs to {}", schema.issuer_did)));
    }
    Ok(ctx.schemas.revoke(schema_id, cancel).await?)
}
