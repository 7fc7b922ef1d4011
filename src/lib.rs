//! Zero-knowledge identity proof verifier.
//!
//! Wallets answer an issued request with a proof token; [`protocol::Verifier`]
//! checks the proof, binds it to the requested query and confirms the
//! issuer's state on chain.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod protocol;
pub mod services;

pub use error::{AppError, VerifyError};
