//! Verification core: token envelope, circuits, queries, identifiers and
//! the orchestrating verifier.

pub mod circuits;
pub mod field;
pub mod groth16;
pub mod hash;
pub mod identity;
pub mod query;
pub mod token;
pub mod verifier;

pub use circuits::CircuitId;
pub use query::{Operator, Query};
pub use token::ProofToken;
pub use verifier::{VerificationResult, Verifier, VerifyOptions};
