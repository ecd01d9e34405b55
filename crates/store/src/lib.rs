//! PostgreSQL persistence for the identity engine.
//!
//! This crate provides:
//! - The sparse Merkle tree node store over `mt_node`/`mt_root` (`node_store`)
//! - Repositories for identities, credentials, the state log, requests,
//!   statistics and schemas, as free functions over a borrowed connection
//! - Transaction scope with a single deadlock retry (`retry`)
//! - Pool construction and embedded migrations (`pool`)
//!
//! Repository functions take `&mut PgConnection`. Passing `&mut *tx` from an
//! open transaction makes them part of it; passing a pooled connection runs
//! them standalone.

pub mod credential;
pub mod error;
pub mod fields;
pub mod identity;
pub mod models;
pub mod node_store;
pub mod pool;
pub mod requests;
pub mod retry;
pub mod schema;
pub mod state_transition;
pub mod statistic;

pub use error::{storage_error, DeadlockAware};
pub use fields::{FieldMap, FieldValue};
pub use models::{
    Credential, CredentialRequest, CredentialStatus, Identity, ProofRequest, ProofResponse, RequestStatus, Role,
    StateTransition,
};
pub use node_store::PgNodeStore;
pub use pool::{connect, connect_url, migrate, PgSettings};
pub use retry::{in_transaction, retry_on_deadlock, TxFuture};
pub use schema::PgSchemaRepository;
pub use statistic::{Counter, Statistics};
