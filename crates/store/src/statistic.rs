//! Per-role activity counters.

use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use idenstate_core::StorageError;

use crate::error::storage_error;
use crate::models::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    CredentialsReceived,
    ProofsSubmitted,
    CredentialsIssued,
    CredentialsRevoked,
    SchemasCreated,
    ProofRequestsCreated,
    ProofsVerified,
}

impl Counter {
    /// The role whose statistics table carries this counter.
    pub fn role(self) -> Role {
        match self {
            Counter::CredentialsReceived | Counter::ProofsSubmitted => Role::Holder,
            Counter::CredentialsIssued | Counter::CredentialsRevoked | Counter::SchemasCreated => Role::Issuer,
            Counter::ProofRequestsCreated | Counter::ProofsVerified => Role::Verifier,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Counter::CredentialsReceived => "credentials_received",
            Counter::ProofsSubmitted => "proofs_submitted",
            Counter::CredentialsIssued => "credentials_issued",
            Counter::CredentialsRevoked => "credentials_revoked",
            Counter::SchemasCreated => "schemas_created",
            Counter::ProofRequestsCreated => "proof_requests_created",
            Counter::ProofsVerified => "proofs_verified",
        }
    }
}

fn table(role: Role) -> &'static str {
    match role {
        Role::Holder => "statistic_holder",
        Role::Issuer => "statistic_issuer",
        Role::Verifier => "statistic_verifier",
    }
}

/// Add one to `counter` for `identity_id`, creating the row on first use.
pub async fn increment(conn: &mut PgConnection, identity_id: Uuid, counter: Counter) -> Result<(), StorageError> {
    let table = table(counter.role());
    let column = counter.column();
    sqlx::query(&format!(
        "INSERT INTO {table} (identity_id, {column}) VALUES ($1, 1)
         ON CONFLICT (identity_id) DO UPDATE SET {column} = {table}.{column} + 1, updated_at = now()"
    ))
    .bind(identity_id)
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

/// Counter values of one identity; counters never touched read as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub counters: Vec<(&'static str, i64)>,
}

impl Statistics {
    pub fn get(&self, counter: Counter) -> i64 {
        self.counters
            .iter()
            .find(|(name, _)| *name == counter.column())
            .map_or(0, |(_, v)| *v)
    }
}

const ALL: [Counter; 7] = [
    Counter::CredentialsReceived,
    Counter::ProofsSubmitted,
    Counter::CredentialsIssued,
    Counter::CredentialsRevoked,
    Counter::SchemasCreated,
    Counter::ProofRequestsCreated,
    Counter::ProofsVerified,
];

pub async fn get(conn: &mut PgConnection, identity_id: Uuid, role: Role) -> Result<Statistics, StorageError> {
    let mut stats = Statistics::default();
    for counter in ALL.into_iter().filter(|c| c.role() == role) {
        let value: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT {} FROM {} WHERE identity_id = $1",
            counter.column(),
            table(role)
        ))
        .bind(identity_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_error)?;
        stats.counters.push((counter.column(), value.unwrap_or(0)));
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_partition_by_role() {
        let holder: Vec<_> = ALL.into_iter().filter(|c| c.role() == Role::Holder).collect();
        assert_eq!(holder, [Counter::CredentialsReceived, Counter::ProofsSubmitted]);
        assert_eq!(ALL.into_iter().filter(|c| c.role() == Role::Issuer).count(), 3);

        let stats = Statistics { counters: vec![("credentials_issued", 4)] };
        assert_eq!(stats.get(Counter::CredentialsIssued), 4);
        assert_eq!(stats.get(Counter::CredentialsRevoked), 0);
    }
}
