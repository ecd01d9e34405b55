//! Process-wide application context.
//!
//! Holds the long-lived resources every service needs: the connection pool,
//! the schema service with its pinning client, the embedded JSON-LD
//! contexts and the GIST mirror. Built once at startup and passed
//! explicitly to every operation.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use idenstate_core::{Blockchain, DidMethod, Network};
use idenstate_schema::{DocumentCache, PinataClient, PinningClient, SchemaService};
use idenstate_store::PgSchemaRepository;

use crate::config::Config;
use crate::error::NodeError;
use crate::gist::GistCache;

/// DID parameters every identity of this node is created under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DidSettings {
    pub method: DidMethod,
    pub blockchain: Blockchain,
    pub network: Network,
}

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub schemas: SchemaService,
    pub documents: Arc<DocumentCache>,
    pub gist: Arc<GistCache>,
    pub did: DidSettings,
}

impl AppContext {
    /// Connect to Postgres, apply migrations and build the pinning client.
    pub async fn init(config: Config) -> Result<Self, NodeError> {
        config.validate()?;
        let pool = idenstate_store::connect(&config.postgres).await?;
        idenstate_store::migrate(&pool).await?;
        let pinning = Arc::new(PinataClient::new(config.ipfs.pinata())?);
        let ctx = Self::from_parts(config, pool, pinning)?;
        info!(
            method = ctx.did.method.as_str(),
            blockchain = ctx.did.blockchain.as_str(),
            network = ctx.did.network.as_str(),
            mt_level = ctx.mt_level(),
            "application context ready"
        );
        Ok(ctx)
    }

    /// Assemble a context around an existing pool and pinning backend.
    pub fn from_parts(config: Config, pool: PgPool, pinning: Arc<dyn PinningClient>) -> Result<Self, NodeError> {
        let (method, blockchain, network) = config.did.resolve()?;
        let repository = Arc::new(PgSchemaRepository::new(pool.clone()));
        Ok(Self {
            config: Arc::new(config),
            schemas: SchemaService::new(pinning, repository),
            pool,
            documents: Arc::new(DocumentCache::embedded()?),
            gist: Arc::new(GistCache::new()),
            did: DidSettings { method, blockchain, network },
        })
    }

    /// Depth of every identity tree created by this node.
    pub fn mt_level(&self) -> usize {
        self.config.circuit.mt_level
    }
}
