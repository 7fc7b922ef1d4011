//! Error types for the verifier

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Terminal failure of a single verification attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unsupported circuit: {0}")]
    UnsupportedCircuit(String),

    #[error("Invalid proof")]
    InvalidProof,

    #[error("Query mismatch: {0}")]
    QueryMismatch(String),

    #[error("Identity state not found: {0}")]
    StateNotFound(String),

    #[error("Identity state is stale: {0}")]
    StaleState(String),

    #[error("Proof generation timestamp is outdated: generated {age_secs}s ago")]
    ProofExpired { age_secs: u64 },

    #[error("No state resolver registered for network {0}")]
    UnsupportedNetwork(String),

    #[error("Verification key not found for circuit {0}")]
    KeyNotFound(String),

    #[error("Invalid verification key for circuit {circuit}: {reason}")]
    InvalidVerificationKey { circuit: String, reason: String },

    #[error("Schema fetch failed: {0}")]
    SchemaFetch(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl VerifyError {
    /// Stable name of the failure kind, reported to callers next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::MalformedToken(_) => "MalformedTokenError",
            VerifyError::UnsupportedCircuit(_) => "UnsupportedCircuitError",
            VerifyError::InvalidProof => "InvalidProofError",
            VerifyError::QueryMismatch(_) => "QueryMismatchError",
            VerifyError::StateNotFound(_) => "StateNotFoundError",
            VerifyError::StaleState(_) => "StaleStateError",
            VerifyError::ProofExpired { .. } => "ProofExpiredError",
            VerifyError::UnsupportedNetwork(_) => "UnsupportedNetworkError",
            VerifyError::KeyNotFound(_) => "KeyNotFoundError",
            VerifyError::InvalidVerificationKey { .. } => "InvalidVerificationKeyError",
            VerifyError::SchemaFetch(_) => "SchemaFetchError",
            VerifyError::InvalidQuery(_) => "InvalidQueryError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            VerifyError::MalformedToken(_)
            | VerifyError::UnsupportedCircuit(_)
            | VerifyError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            VerifyError::InvalidProof
            | VerifyError::StateNotFound(_)
            | VerifyError::StaleState(_)
            | VerifyError::ProofExpired { .. } => StatusCode::UNAUTHORIZED,
            VerifyError::QueryMismatch(_) => StatusCode::FORBIDDEN,
            VerifyError::UnsupportedNetwork(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VerifyError::SchemaFetch(_) => StatusCode::BAD_GATEWAY,
            VerifyError::KeyNotFound(_) | VerifyError::InvalidVerificationKey { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("Session not found or expired: {0}")]
    SessionNotFound(String),

    #[error("Request registry is full")]
    RegistryFull,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Verify(e) => e.kind(),
            AppError::SessionNotFound(_) => "SessionNotFoundError",
            AppError::RegistryFull => "RegistryFullError",
            AppError::BadRequest(_) => "BadRequestError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Verify(e) => (e.status(), self.to_string()),
            AppError::SessionNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::RegistryFull => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "kind": self.kind(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_verify_error_maps_to_a_distinct_kind() {
        let errors = [
            VerifyError::MalformedToken("x".into()),
            VerifyError::UnsupportedCircuit("x".into()),
            VerifyError::InvalidProof,
            VerifyError::QueryMismatch("x".into()),
            VerifyError::StateNotFound("x".into()),
            VerifyError::StaleState("x".into()),
            VerifyError::ProofExpired { age_secs: 1 },
            VerifyError::UnsupportedNetwork("x".into()),
            VerifyError::KeyNotFound("x".into()),
            VerifyError::InvalidVerificationKey { circuit: "x".into(), reason: "y".into() },
            VerifyError::SchemaFetch("x".into()),
            VerifyError::InvalidQuery("x".into()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn query_mismatch_is_forbidden_and_bad_proof_unauthorized() {
        let mismatch = AppError::from(VerifyError::QueryMismatch("hash".into())).into_response();
        assert_eq!(mismatch.status(), StatusCode::FORBIDDEN);

        let invalid = AppError::from(VerifyError::InvalidProof).into_response();
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let response = AppError::Internal("db password".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
