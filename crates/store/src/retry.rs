//! Transaction scope with a single retry on deadlock-class aborts.

use std::future::Future;
use std::pin::Pin;

use sqlx::{PgConnection, PgPool};
use tracing::warn;

use idenstate_core::StorageError;

use crate::error::{storage_error, DeadlockAware};

/// Future returned by a transaction body borrowing the connection for `'c`.
pub type TxFuture<'c, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>;

/// Run `f`, retrying exactly once if it fails with a deadlock.
pub async fn retry_on_deadlock<T, E, F, Fut>(op: &str, mut f: F) -> Result<T, E>
where
    E: DeadlockAware + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match f().await {
        Err(e) if e.is_deadlock() => {
            warn!(op, error = %e, "deadlock detected, retrying once");
            f().await
        }
        other => other,
    }
}

/// Run `f` inside one database transaction.
///
/// The transaction commits only if `f` succeeds; an error, a panic or the
/// future being dropped rolls it back. A deadlock reruns the whole body
/// once on a fresh transaction.
pub async fn in_transaction<T, E, F>(pool: &PgPool, op: &str, f: F) -> Result<T, E>
where
    E: DeadlockAware + std::fmt::Display + From<StorageError>,
    F: for<'c> Fn(&'c mut PgConnection) -> TxFuture<'c, T, E>,
{
    let f = &f;
    retry_on_deadlock(op, || async move {
        let mut tx = pool.begin().await.map_err(storage_error)?;
        let out = f(&mut *tx).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(out)
    })
    .await
}
