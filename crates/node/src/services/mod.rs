//! Operations over the identity engine.
//!
//! Every mutating operation runs in one database transaction, takes the
//! affected identity's row lock before reading its trees, and is abandoned
//! (rolling the transaction back) when its cancellation token fires.

pub mod credential;
pub mod identity;
pub mod proof;
pub mod requests;
pub mod schema;
pub mod transition;

use std::future::Future;

use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use idenstate_core::{Fr, IdentityState, NodeStore, StorageError};
use idenstate_store::{identity as identity_repo, Identity, Role};

use crate::error::{Entity, NodeError};

/// Drive `fut` unless `cancel` fires first. Dropping an in-flight
/// transaction future rolls the transaction back.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, NodeError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    if cancel.is_cancelled() {
        return Err(NodeError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NodeError::Cancelled),
        out = fut => out,
    }
}

/// Take the identity's row lock; every tree mutation starts here.
pub(crate) async fn lock_identity(conn: &mut PgConnection, id: Uuid) -> Result<Identity, NodeError> {
    identity_repo::lock(conn, id).await.map_err(|e| match e {
        StorageError::NotFound(_) => NodeError::not_found(Entity::Identity, id),
        other => other.into(),
    })
}

pub(crate) async fn find_identity(conn: &mut PgConnection, id: Uuid) -> Result<Identity, NodeError> {
    identity_repo::find_by_id(conn, id)
        .await?
        .ok_or_else(|| NodeError::not_found(Entity::Identity, id))
}

/// Reopen an identity's trees and check they still hash to its stored state.
pub(crate) async fn restore_state<S: NodeStore + ?Sized>(
    store: &mut S,
    record: &Identity,
) -> Result<IdentityState, NodeError> {
    let state = IdentityState::restore(store, record.public_key, record.handles).await?;
    if state.state_value()? != record.state {
        return Err(StorageError::Corrupt(format!("trees of identity {} do not match its stored state", record.id)).into());
    }
    Ok(state)
}

pub(crate) fn require_role(identity: &Identity, role: Role) -> Result<(), NodeError> {
    if identity.role != role {
        return Err(NodeError::Forbidden(format!(
            "identity {} is a {}, not a {}",
            identity.id, identity.role, role
        )));
    }
    Ok(())
}

/// A fresh 128-bit random field element, used for request ids and challenges.
pub(crate) fn random_field() -> Fr {
    uuid_field(Uuid::new_v4())
}

pub(crate) fn uuid_field(id: Uuid) -> Fr {
    Fr::from(id.as_u128())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use idenstate_core::{Blockchain, DidMethod, MemoryNodeStore, Network, PrivateKey};

    async fn issuer_record() -> Identity {
        let mut seed = [0u8; 32];
        seed[31] = 7;
        let key = PrivateKey::from_seed(&seed).unwrap();
        let mut store = MemoryNodeStore::new();
        let state = IdentityState::create(&mut store, key.public(), 16).await.unwrap();
        Identity {
            id: Uuid::new_v4(),
            did: state.did(DidMethod::PolygonId, Blockchain::Polygon, Network::Amoy).unwrap(),
            role: Role::Issuer,
            public_key: key.public(),
            state: state.state_value().unwrap(),
            handles: state.handles(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_require_role() {
        let record = issuer_record().await;
        assert!(require_role(&record, Role::Issuer).is_ok());
        assert!(matches!(require_role(&record, Role::Holder), Err(NodeError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_restore_state_detects_drift() {
        let mut seed = [0u8; 32];
        seed[31] = 7;
        let key = PrivateKey::from_seed(&seed).unwrap();
        let mut store = MemoryNodeStore::new();
        let state = IdentityState::create(&mut store, key.public(), 16).await.unwrap();

        let mut record = issuer_record().await;
        record.handles = state.handles();
        record.state = state.state_value().unwrap();
        assert!(restore_state(&mut store, &record).await.is_ok());

        record.state = Fr::from(1u64);
        assert!(matches!(
            restore_state(&mut store, &record).await,
            Err(NodeError::Storage(StorageError::Corrupt(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = cancellable(&cancel, async { Ok::<_, NodeError>(1) }).await;
        assert!(matches!(out, Err(NodeError::Cancelled)));

        let live = CancellationToken::new();
        assert_eq!(cancellable(&live, async { Ok::<_, NodeError>(2) }).await.unwrap(), 2);
        assert_eq!(uuid_field(Uuid::from_u128(5)), Fr::from(5u64));
    }
}
