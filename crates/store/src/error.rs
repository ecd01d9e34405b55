//! Mapping of database failures onto the storage error taxonomy.

use idenstate_core::StorageError;

/// Postgres SQLSTATEs retried once: deadlock and serialization failure.
const DEADLOCK_CODES: [&str; 2] = ["40P01", "40001"];
const UNIQUE_VIOLATION: &str = "23505";
const QUERY_CANCELED: &str = "57014";

pub fn storage_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::RowNotFound => StorageError::NotFound(err.to_string()),
        sqlx::Error::PoolTimedOut => StorageError::Timeout,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) if DEADLOCK_CODES.contains(&code) => StorageError::Deadlock(db.message().to_string()),
            Some(UNIQUE_VIOLATION) => StorageError::AlreadyExists(
                db.constraint().map(str::to_string).unwrap_or_else(|| db.message().to_string()),
            ),
            Some(QUERY_CANCELED) => StorageError::Timeout,
            _ => StorageError::Backend(err.to_string()),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StorageError::Corrupt(err.to_string()),
        _ => StorageError::Backend(err.to_string()),
    }
}

/// Errors that can tell whether they came from a deadlock-class abort.
pub trait DeadlockAware {
    fn is_deadlock(&self) -> bool;
}

impl DeadlockAware for StorageError {
    fn is_deadlock(&self) -> bool {
        StorageError::is_deadlock(self)
    }
}

/// Convert a stored id column into a tree id.
pub(crate) fn tree_id_from_db(value: i64) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Corrupt(format!("negative tree id {value}")))
}

pub(crate) fn db_id(value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Corrupt(format!("tree id {value} out of range")))
}

pub(crate) fn corrupt(what: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt(format!("{what}: {err}"))
}
