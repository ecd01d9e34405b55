//! State-transition log: publication queue and prover inputs.
//!
//! Genesis entries are implied by the identifier and never published. Every
//! other entry is published in log order, since the state contract only
//! accepts a transition from the state it currently holds.

use chrono::Utc;
use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use idenstate_circuits::{sign_transition, state_transition, StateTransitionInputs};
use idenstate_core::PrivateKey;
use idenstate_store::{in_transaction, state_transition as log, storage_error, PgNodeStore, StateTransition};

use super::{cancellable, find_identity, lock_identity, restore_state};
use crate::context::AppContext;
use crate::error::{Entity, NodeError};

/// Oldest unpublished transitions across all identities.
pub async fn pending(ctx: &AppContext, limit: i64) -> Result<Vec<StateTransition>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    Ok(log::pending(&mut conn, limit).await?)
}

/// An identity's log in append order.
pub async fn history(ctx: &AppContext, identity_id: Uuid) -> Result<Vec<StateTransition>, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    find_identity(&mut conn, identity_id).await?;
    Ok(log::list(&mut conn, identity_id).await?)
}

async fn find(conn: &mut PgConnection, id: Uuid) -> Result<StateTransition, NodeError> {
    log::find_by_id(conn, id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::StateTransition, id))
}

/// Prover inputs for a logged transition, signed with the identity's key.
///
/// `isOldStateGenesis` is set when the transition starts from the state the
/// genesis entry ended in.
pub async fn state_transition_inputs(
    ctx: &AppContext,
    key: &PrivateKey,
    transition_id: Uuid,
) -> Result<StateTransitionInputs, NodeError> {
    let mut conn = ctx.pool.acquire().await.map_err(storage_error)?;
    let entry = find(&mut conn, transition_id).await?;
    if entry.is_genesis {
        return Err(NodeError::validation("transition", "genesis transitions are not proven"));
    }
    let identity = find_identity(&mut conn, entry.identity_id).await?;
    if key.public() != identity.public_key {
        return Err(NodeError::Unauthorized(format!("key does not belong to identity {}", identity.id)));
    }
    let genesis = log::list(&mut conn, identity.id)
        .await?
        .into_iter()
        .find(|t| t.is_genesis)
        .ok_or_else(|| NodeError::validation("transition", format!("identity {} has no genesis entry", identity.id)))?;
    let is_old_state_genesis = entry.old.state == genesis.new.state;

    let signature = sign_transition(key, &entry.old, &entry.new)?;
    let mut store = PgNodeStore::new(&mut conn);
    let state = restore_state(&mut store, &identity).await?;
    let inputs = state_transition(
        &mut store,
        &state,
        identity.did.id,
        &entry.old,
        &entry.new,
        is_old_state_genesis,
        &signature,
    )
    .await?;
    Ok(inputs)
}

/// Record that `transition_id` landed on chain.
pub async fn mark_published(
    ctx: &AppContext,
    transition_id: Uuid,
    tx_hash: String,
    block_number: Option<i64>,
    cancel: &CancellationToken,
) -> Result<StateTransition, NodeError> {
    if tx_hash.trim().is_empty() {
        return Err(NodeError::validation("tx_hash", "must not be empty"));
    }
    let published = cancellable(
        cancel,
        in_transaction(&ctx.pool, "publish_transition", |conn| {
            let tx_hash = tx_hash.clone();
            Box::pin(async move { publish_locked(conn, transition_id, tx_hash, block_number).await })
        }),
    )
    .await?;
    info!(
        transition_id = %published.id,
        identity_id = %published.identity_id,
        tx_hash = published.tx_hash.as_deref().unwrap_or_default(),
        "state transition published"
    );
    Ok(published)
}

async fn publish_locked(
    conn: &mut PgConnection,
    transition_id: Uuid,
    tx_hash: String,
    block_number: Option<i64>,
) -> Result<StateTransition, NodeError> {
    let identity_id = find(&mut *conn, transition_id).await?.identity_id;
    lock_identity(&mut *conn, identity_id).await?;
    let mut entry = find(&mut *conn, transition_id).await?;
    if entry.is_genesis {
        return Err(NodeError::validation("transition", "genesis transitions are not published"));
    }
    if entry.is_published() {
        return Err(NodeError::validation("transition", format!("transition {transition_id} is already published")));
    }
    let earlier_unpublished = log::list(&mut *conn, entry.identity_id)
        .await?
        .into_iter()
        .take_while(|t| t.id != entry.id)
        .any(|t| !t.is_genesis && !t.is_published());
    if earlier_unpublished {
        return Err(NodeError::validation("transition", "an earlier transition is still unpublished"));
    }

    let now = Utc::now();
    log::mark_published(&mut *conn, entry.id, &tx_hash, block_number, now).await?;
    entry.tx_hash = Some(tx_hash);
    entry.block_number = block_number;
    entry.published_at = Some(now);
    Ok(entry)
}
