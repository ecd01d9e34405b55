//! Circuit-input assembly for the identity circuits.
//!
//! This crate provides inputs for:
//! - `AtomicQueryV3`: prove a query over a claim, backed by the issuer's
//!   signature or by inclusion in the issuer's claims tree
//! - `AuthV3`: prove ownership of an identity under the global state tree
//! - `StateTransition`: prove a signed move from one identity state to the next
//!
//! Every routine returns a serializable input struct whose JSON form is the
//! byte blob handed to the external prover.

pub mod atomic_query;
pub mod auth;
pub mod error;
pub mod marshal;
pub mod proofs;
pub mod query;
pub mod state_transition;


pub use atomic_query::{
    atomic_query_v3_mtp, atomic_query_v3_sig, AtomicQueryRequest, AtomicQueryV3Inputs, ProofType,
    QueryNonces,
};
pub use auth::{auth_v3, gist_key, AuthV3Inputs, GistProof, GIST_DEPTH};
pub use error::InputsError;
pub use marshal::{MtProof, SignatureJson};
pub use query::{Operator, Query, MAX_QUERY_VALUES};
pub use state_transition::{sign_transition, state_transition, transition_message, StateTransitionInputs};
