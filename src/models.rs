//! Data models for API requests/responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::circuits::CircuitId;
use crate::protocol::field::to_decimal;
use crate::protocol::query::Query;
use crate::services::sessions::Issued;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
    pub networks: Vec<String>,
    pub cached_keys: usize,
}

/// An issued authentication request, as handed to the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub session_id: String,
    pub circuit_id: CircuitId,
    pub query: Query,
    pub callback_url: String,
    /// DID of this verifier.
    pub audience: String,
    pub expires_at: DateTime<Utc>,
}

impl ChallengeResponse {
    pub fn new(issued: &Issued, callback_url: String, audience: String) -> Self {
        Self {
            session_id: issued.request.session_id.clone(),
            circuit_id: issued.request.circuit_id,
            query: issued.request.query.clone(),
            callback_url: format!("{}?sessionId={}", callback_url, issued.request.session_id),
            audience,
            expires_at: issued.expires_at,
        }
    }
}

/// An outstanding request as listed by `GET /api/requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    pub session_id: String,
    pub circuit_id: CircuitId,
    pub schema: String,
    pub claim_path_key: String,
    pub operator: u8,
    /// `$lt`, `$in`, ...
    pub operator_name: String,
    pub value: Vec<String>,
    /// The hash a proof must declare to answer this request.
    pub query_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Issued> for RequestView {
    fn from(issued: &Issued) -> Self {
        let query = &issued.request.query;
        Self {
            session_id: issued.request.session_id.clone(),
            circuit_id: issued.request.circuit_id,
            schema: to_decimal(query.schema()),
            claim_path_key: to_decimal(query.claim_path_key()),
            operator: query.operator().code(),
            operator_name: query.operator().to_string(),
            value: query.values().iter().map(to_decimal).collect(),
            query_hash: to_decimal(&query.query_hash()),
            expires_at: issued.expires_at,
        }
    }
}

/// Body of `POST /api/requests`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Kept as text so unknown circuits surface as `UnsupportedCircuit`.
    pub circuit_id: String,
    pub query: Query,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackParams {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub identifier: String,
    pub message: String,
    pub verified_at: DateTime<Utc>,
}
