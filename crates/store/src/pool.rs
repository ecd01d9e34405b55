//! Connection pool and embedded migrations.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use idenstate_core::StorageError;

use crate::error::storage_error;

/// Settings of the `[postgres]` configuration section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    /// `disable`, `prefer`, `require`, `verify-ca` or `verify-full`.
    pub sslmode: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Server-side statement timeout; 0 disables it.
    pub statement_timeout_secs: u64,
}

impl Default for PgSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: String::new(),
            name: "idenstate".into(),
            sslmode: "prefer".into(),
            max_connections: 10,
            acquire_timeout_secs: 5,
            statement_timeout_secs: 30,
        }
    }
}

impl PgSettings {
    pub fn connect_options(&self) -> Result<PgConnectOptions, StorageError> {
        let ssl_mode = PgSslMode::from_str(&self.sslmode)
            .map_err(|e| StorageError::Backend(format!("invalid sslmode {:?}: {e}", self.sslmode)))?;
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.name)
            .ssl_mode(ssl_mode);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        if self.statement_timeout_secs > 0 {
            let timeout = format!("{}s", self.statement_timeout_secs);
            options = options.options([("statement_timeout", timeout.as_str())]);
        }
        Ok(options)
    }
}

/// Open the process-wide pool.
pub async fn connect(settings: &PgSettings) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect_with(settings.connect_options()?)
        .await
        .map_err(storage_error)?;
    info!(host = %settings.host, database = %settings.name, "connected to PostgreSQL");
    Ok(pool)
}

/// Open a pool from a connection URL, as used by tests and tooling.
pub async fn connect_url(url: &str, max_connections: u32) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(storage_error)
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::Backend(format!("migration failed: {e}")))?;
    info!("database migrations applied");
    Ok(())
}
