//! Identity enrolment and lookup.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use idenstate_core::{Did, IdentityError, IdentityState, PublicKey, TreeState};
use idenstate_store::{
    identity, in_transaction, state_transition, statistic, storage_error, Identity, PgNodeStore, Role, StateTransition,
    Statistics,
};

use super::{cancellable, find_identity, restore_state};
use crate::context::AppContext;
use crate::error::{Entity, NodeError};

/// Create an identity for `public_key`.
///
/// Allocates the three trees, inserts the auth claim, and records the
/// identity row with its genesis log entry, all in one transaction. A key
/// can be enrolled once per node.
pub async fn enrol(
    ctx: &AppContext,
    public_key: PublicKey,
    role: Role,
    cancel: &CancellationToken,
) -> Result<Identity, NodeError> {
    let depth = ctx.mt_level();
    let did_settings = ctx.did;

    let record = cancellable(
        cancel,
        in_transaction(&ctx.pool, "enrol_identity", |conn| {
            Box::pin(async move {
                let state = {
                    let mut store = PgNodeStore::new(&mut *conn);
                    IdentityState::create(&mut store, public_key, depth).await?
                };
                let did = state.did(did_settings.method, did_settings.blockchain, did_settings.network)?;
                if identity::find_by_did(&mut *conn, &did).await?.is_some() {
                    return Err(IdentityError::KeyExists.into());
                }

                let now = Utc::now();
                let record = Identity {
                    id: Uuid::new_v4(),
                    did,
                    role,
                    public_key,
                    state: state.state_value()?,
                    handles: state.handles(),
                    created_at: now,
                    updated_at: now,
                };
                identity::insert(&mut *conn, &record).await?;
                state_transition::append(
                    &mut *conn,
                    &StateTransition {
                        id: Uuid::new_v4(),
                        identity_id: record.id,
                        old: TreeState::zero(),
                        new: state.tree_state()?,
                        is_genesis: true,
                        tx_hash: None,
                        block_number: None,
                        created_at: now,
                        published_at: None,
                    },
                )
                .await?;
                Ok(record)
            })
        }),
    )
    .await?;

    info!(identity_id = %record.id, did = %record.did, role = %record.role, "enrolled identity");
    Ok(record)
}

pub async fn get(ctx: &AppContext, id: Uuid) -> Result<Identity, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    find_identity(&mut conn, id).await
}

pub async fn find_by_did(ctx: &AppContext, did: &str) -> Result<Identity, NodeError> {
    let parsed: Did = did.parse()?;
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    identity::find_by_did(&mut conn, &parsed)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::Identity, did))
}

pub async fn list(ctx: &AppContext, role: Option<Role>, limit: i64, offset: i64) -> Result<Vec<Identity>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    Ok(identity::list(&mut conn, role, limit, offset).await?)
}

/// Reopen the identity's trees at its current state. Fails with a storage
/// corruption error when the trees no longer hash to the recorded state.
pub async fn load_state(ctx: &AppContext, id: Uuid) -> Result<(Identity, IdentityState), NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let record = find_identity(&mut conn, id).await?;
    let mut store = PgNodeStore::new(&mut conn);
    let state = restore_state(&mut store, &record).await?;
    Ok((record, state))
}

/// Role counters of an identity.
pub async fn statistics(ctx: &AppContext, id: Uuid) -> Result<Statistics, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let record = find_identity(&mut conn, id).await?;
    Ok(statistic::get(&mut conn, record.id, record.role).await?)
}
