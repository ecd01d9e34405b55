//! Append-only state log.
//!
//! Per identity the log is a chain: the first entry is the genesis
//! transition from the all-zero state, and every later entry starts from
//! the state the previous one ended in. [`append`] enforces this against
//! the stored tail, so it must run under the identity lock.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

use idenstate_core::field::{fr_from_decimal, fr_to_decimal, fr_to_hex};
use idenstate_core::{Fr, StorageError, TreeState};

use crate::error::{corrupt, storage_error};
use crate::fields::{self, FieldMap};
use crate::models::StateTransition;

const COLUMNS: &str = "id, identity_id, old_state, old_claims_root, old_rev_root, old_roots_root, new_state, \
                       new_claims_root, new_rev_root, new_roots_root, is_genesis, tx_hash, block_number, \
                       created_at, published_at";

#[derive(sqlx::FromRow)]
struct TransitionRow {
    id: Uuid,
    identity_id: Uuid,
    old_state: String,
    old_claims_root: String,
    old_rev_root: String,
    old_roots_root: String,
    new_state: String,
    new_claims_root: String,
    new_rev_root: String,
    new_roots_root: String,
    is_genesis: bool,
    tx_hash: Option<String>,
    block_number: Option<i64>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

fn decimal(what: &str, value: &str) -> Result<Fr, StorageError> {
    fr_from_decimal(value).map_err(|e| corrupt(what, e))
}

impl TransitionRow {
    fn into_record(self) -> Result<StateTransition, StorageError> {
        Ok(StateTransition {
            id: self.id,
            identity_id: self.identity_id,
            old: TreeState {
                state: decimal("old state", &self.old_state)?,
                claims_root: decimal("old claims root", &self.old_claims_root)?,
                revocation_root: decimal("old revocation root", &self.old_rev_root)?,
                root_of_roots: decimal("old roots root", &self.old_roots_root)?,
            },
            new: TreeState {
                state: decimal("new state", &self.new_state)?,
                claims_root: decimal("new claims root", &self.new_claims_root)?,
                revocation_root: decimal("new revocation root", &self.new_rev_root)?,
                root_of_roots: decimal("new roots root", &self.new_roots_root)?,
            },
            is_genesis: self.is_genesis,
            tx_hash: self.tx_hash,
            block_number: self.block_number,
            created_at: self.created_at,
            published_at: self.published_at,
        })
    }
}

fn broken_chain(from: &Fr, to: &Fr) -> StorageError {
    StorageError::InvalidTransition {
        table: "state_transition".to_string(),
        from: fr_to_hex(from),
        to: fr_to_hex(to),
    }
}

/// Check that `entry` may follow `tail` in an identity's log.
pub fn check_chain(tail: Option<&StateTransition>, entry: &StateTransition) -> Result<(), StorageError> {
    match tail {
        None if entry.is_genesis && entry.old == TreeState::zero() => Ok(()),
        None => Err(broken_chain(&entry.old.state, &entry.new.state)),
        Some(_) if entry.is_genesis => Err(broken_chain(&entry.old.state, &entry.new.state)),
        Some(prev) if prev.new.state == entry.old.state => Ok(()),
        Some(prev) => Err(broken_chain(&prev.new.state, &entry.old.state)),
    }
}

pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<StateTransition>, StorageError> {
    sqlx::query_as::<_, TransitionRow>(&format!("SELECT {COLUMNS} FROM state_transition WHERE id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(storage_error)?
        .map(TransitionRow::into_record)
        .transpose()
}

pub async fn latest(conn: &mut PgConnection, identity_id: Uuid) -> Result<Option<StateTransition>, StorageError> {
    sqlx::query_as::<_, TransitionRow>(&format!(
        "SELECT {COLUMNS} FROM state_transition WHERE identity_id = $1 ORDER BY seq DESC LIMIT 1"
    ))
    .bind(identity_id)
    .fetch_optional(conn)
    .await
    .map_err(storage_error)?
    .map(TransitionRow::into_record)
    .transpose()
}

/// Append `entry` after the identity's current tail.
pub async fn append(conn: &mut PgConnection, entry: &StateTransition) -> Result<(), StorageError> {
    let tail = latest(&mut *conn, entry.identity_id).await?;
    check_chain(tail.as_ref(), entry)?;

    sqlx::query(
        "INSERT INTO state_transition (id, identity_id, old_state, old_claims_root, old_rev_root, old_roots_root,
                                       new_state, new_claims_root, new_rev_root, new_roots_root, is_genesis,
                                       tx_hash, block_number, created_at, published_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(entry.id)
    .bind(entry.identity_id)
    .bind(fr_to_decimal(&entry.old.state))
    .bind(fr_to_decimal(&entry.old.claims_root))
    .bind(fr_to_decimal(&entry.old.revocation_root))
    .bind(fr_to_decimal(&entry.old.root_of_roots))
    .bind(fr_to_decimal(&entry.new.state))
    .bind(fr_to_decimal(&entry.new.claims_root))
    .bind(fr_to_decimal(&entry.new.revocation_root))
    .bind(fr_to_decimal(&entry.new.root_of_roots))
    .bind(entry.is_genesis)
    .bind(&entry.tx_hash)
    .bind(entry.block_number)
    .bind(entry.created_at)
    .bind(entry.published_at)
    .execute(conn)
    .await
    .map_err(storage_error)?;

    debug!(
        identity_id = %entry.identity_id,
        new_state = %fr_to_hex(&entry.new.state),
        genesis = entry.is_genesis,
        "appended state transition"
    );
    Ok(())
}

/// The identity's log in append order.
pub async fn list(conn: &mut PgConnection, identity_id: Uuid) -> Result<Vec<StateTransition>, StorageError> {
    let rows = sqlx::query_as::<_, TransitionRow>(&format!(
        "SELECT {COLUMNS} FROM state_transition WHERE identity_id = $1 ORDER BY seq"
    ))
    .bind(identity_id)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(TransitionRow::into_record).collect()
}

/// Unpublished transitions across all identities, oldest first. Genesis
/// entries are implied by the identifier and never published.
pub async fn pending(conn: &mut PgConnection, limit: i64) -> Result<Vec<StateTransition>, StorageError> {
    let rows = sqlx::query_as::<_, TransitionRow>(&format!(
        "SELECT {COLUMNS} FROM state_transition WHERE tx_hash IS NULL AND NOT is_genesis ORDER BY seq LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(conn)
    .await
    .map_err(storage_error)?;
    rows.into_iter().map(TransitionRow::into_record).collect()
}

pub async fn mark_published(
    conn: &mut PgConnection,
    id: Uuid,
    tx_hash: &str,
    block_number: Option<i64>,
    published_at: DateTime<Utc>,
) -> Result<(), StorageError> {
    let mut fields: FieldMap = vec![("tx_hash", tx_hash.into()), ("published_at", published_at.into())];
    if let Some(block) = block_number {
        fields.push(("block_number", block.into()));
    }
    if !fields::update_fields(conn, fields::STATE_TRANSITION, id, &fields).await? {
        return Err(StorageError::NotFound(format!("state transition {id}")));
    }
    Ok(())
}

/// Number of published transitions and the latest publication time.
///
/// Changes whenever a transition is published, so it identifies a version
/// of the published state set.
pub async fn published_watermark(conn: &mut PgConnection) -> Result<(i64, Option<DateTime<Utc>>), StorageError> {
    let row: (i64, Option<DateTime<Utc>>) = sqlx::query_as(
        "SELECT COUNT(*), MAX(published_at) FROM state_transition WHERE tx_hash IS NOT NULL",
    )
    .fetch_one(conn)
    .await
    .map_err(storage_error)?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::Zero;

    fn state(seed: u64) -> TreeState {
        TreeState::new(Fr::from(seed), Fr::zero(), Fr::zero()).unwrap()
    }

    fn entry(old: TreeState, new: TreeState, is_genesis: bool) -> StateTransition {
        StateTransition {
            id: Uuid::new_v4(),
            identity_id: Uuid::nil(),
            old,
            new,
            is_genesis,
            tx_hash: None,
            block_number: None,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    #[test]
    fn test_chain_rules() {
        let genesis = entry(TreeState::zero(), state(1), true);
        assert!(check_chain(None, &genesis).is_ok());

        // a log cannot start anywhere but genesis
        assert!(check_chain(None, &entry(state(1), state(2), false)).is_err());
        assert!(check_chain(None, &entry(state(1), state(2), true)).is_err());

        let next = entry(state(1), state(2), false);
        assert!(check_chain(Some(&genesis), &next).is_ok());

        let fork = entry(state(3), state(4), false);
        assert!(matches!(
            check_chain(Some(&genesis), &fork),
            Err(StorageError::InvalidTransition { .. })
        ));

        let second_genesis = entry(TreeState::zero(), state(5), true);
        assert!(check_chain(Some(&next), &second_genesis).is_err());
    }
}
