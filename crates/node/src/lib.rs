//! Identity node.
//!
//! This crate provides:
//! - TOML configuration with environment overrides (`config`)
//! - Tracing setup for the binary (`telemetry`)
//! - The process-wide application context (`context`) and the cached
//!   mirror of the global identity-state tree (`gist`)
//! - Services over the identity engine: enrolment, schemas, issuance and
//!   revocation, the state-transition log, prover inputs, and the credential
//!   and proof request lifecycles (`services`)

pub mod config;
pub mod context;
pub mod error;
pub mod gist;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use context::{AppContext, DidSettings};
pub use error::{Entity, ErrorCode, NodeError};
