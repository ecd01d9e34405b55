//! Node configuration.
//!
//! Loaded from a TOML file whose sections mirror the deployment settings:
//! `server`, `tls`, `postgres`, `redis`, `ipfs`, `circuit`, `blockchain`,
//! `jwt` and `did`. Every section is optional and falls back to defaults.
//! Secrets can be supplied through the environment instead of the file:
//!
//! - `IDENSTATE_POSTGRES_PASSWORD`
//! - `IDENSTATE_IPFS_JWT_KEY`
//! - `IDENSTATE_JWT_SECRET`

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use idenstate_core::smt::{DEFAULT_DEPTH, MAX_DEPTH};
use idenstate_core::{Blockchain, DidMethod, Network};
use idenstate_schema::pinning::DEFAULT_TIMEOUT_SECS;
use idenstate_schema::PinataConfig;
use idenstate_store::PgSettings;

use crate::error::NodeError;

pub const ENV_POSTGRES_PASSWORD: &str = "IDENSTATE_POSTGRES_PASSWORD";
pub const ENV_IPFS_JWT_KEY: &str = "IDENSTATE_IPFS_JWT_KEY";
pub const ENV_JWT_SECRET: &str = "IDENSTATE_JWT_SECRET";

/// Smallest tree depth the circuits accept.
pub const MIN_MT_LEVEL: usize = 2;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub postgres: PgSettings,
    pub redis: RedisConfig,
    pub ipfs: IpfsConfig,
    pub circuit: CircuitConfig,
    pub blockchain: BlockchainConfig,
    pub jwt: JwtConfig,
    pub did: DidConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            timeout: 30,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub password: String,
    pub db: u32,
    pub max_connections: u32,
    pub timeout: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6379,
            password: String::new(),
            db: 0,
            max_connections: 10,
            timeout: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpfsConfig {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub jwt_key: String,
    pub gateway_url: String,
    pub timeout_secs: u64,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pinata.cloud/pinning".into(),
            jwt_key: String::new(),
            gateway_url: "https://gateway.pinata.cloud/ipfs".into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl IpfsConfig {
    pub fn pinata(&self) -> PinataConfig {
        PinataConfig {
            endpoint: self.endpoint.clone(),
            jwt_key: self.jwt_key.clone(),
            gateway_url: self.gateway_url.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Depth of every identity tree.
    pub mt_level: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { mt_level: DEFAULT_DEPTH }
    }
}

/// Consumed by the publisher and resolver, not by the node itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainConfig {
    pub rpc: String,
    pub resolver: String,
    pub state_contract: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    #[serde(skip_serializing)]
    pub secret: String,
    pub access_token_ttl: u64,
    pub refresh_token_ttl: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_token_ttl: 900,
            refresh_token_ttl: 604_800,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DidConfig {
    pub method: String,
    pub blockchain: String,
    pub network: String,
}

impl Default for DidConfig {
    fn default() -> Self {
        Self {
            method: "polygonid".into(),
            blockchain: "polygon".into(),
            network: "amoy".into(),
        }
    }
}

impl DidConfig {
    pub fn resolve(&self) -> Result<(DidMethod, Blockchain, Network), NodeError> {
        let invalid = |e: idenstate_core::IdentityError| NodeError::Config(format!("did: {e}"));
        Ok((
            self.method.parse().map_err(invalid)?,
            self.blockchain.parse().map_err(invalid)?,
            self.network.parse().map_err(invalid)?,
        ))
    }
}

impl Config {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("unable to read {}: {e}", path.display())))?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, NodeError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, NodeError> {
        toml::from_str(content).map_err(|e| NodeError::Config(format!("unable to parse config: {e}")))
    }

    /// Overwrite secrets with non-empty values returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };
        set(&mut self.postgres.password, ENV_POSTGRES_PASSWORD);
        set(&mut self.ipfs.jwt_key, ENV_IPFS_JWT_KEY);
        set(&mut self.jwt.secret, ENV_JWT_SECRET);
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        let level = self.circuit.mt_level;
        if !(MIN_MT_LEVEL..=MAX_DEPTH).contains(&level) {
            return Err(NodeError::Config(format!(
                "circuit.mt_level must be in {MIN_MT_LEVEL}..={MAX_DEPTH}, got {level}"
            )));
        }
        if self.postgres.max_connections == 0 {
            return Err(NodeError::Config("postgres.max_connections must be positive".into()));
        }
        if self.tls.enabled && (self.tls.cert_file.is_empty() || self.tls.key_file.is_empty()) {
            return Err(NodeError::Config("tls.enabled requires cert_file and key_file".into()));
        }
        self.did.resolve()?;
        Ok(())
    }

    /// TOML rendering with secrets omitted.
    pub fn to_redacted_toml(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(format!("unable to encode config: {e}")))
    }
}
