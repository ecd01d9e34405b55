//! Credential schema pipeline.
//!
//! This crate provides:
//! - A declarative schema builder with validation (`builder`)
//! - JSON-Schema and JSON-LD context generation (`documents`)
//! - Embedded JSON-LD contexts and term expansion (`contexts`)
//! - The 128-bit schema hash bound into claims (`hash`)
//! - Content-addressed pinning (`pinning`)
//! - Schema persistence contract and lifecycle service (`repository`, `service`)
//! - Claim construction from a schema and a credential subject (`claim_builder`)

pub mod builder;
pub mod claim_builder;
pub mod contexts;
pub mod documents;
pub mod error;
pub mod hash;
pub mod model;
pub mod pinning;
pub mod repository;
pub mod service;


pub use builder::{SchemaBuilder, SchemaDraft, MAX_SLOT_ATTRIBUTES};
pub use claim_builder::{build_claim, merklized_path, CredentialOptions};
pub use contexts::DocumentCache;
pub use error::{PinningError, SchemaError};
pub use hash::schema_hash;
pub use model::{Attribute, AttributeType, SchemaRecord, SchemaStatus, SlotTag};
pub use pinning::{PinataClient, PinataConfig, PinnedFile, PinningClient};
pub use repository::{MemorySchemaRepository, SchemaRepository};
pub use service::SchemaService;
