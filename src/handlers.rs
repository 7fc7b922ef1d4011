//! HTTP handlers for request issuance and proof callbacks

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::error::AppError;
use crate::models::*;
use crate::protocol::circuits::CircuitId;
use crate::protocol::verifier::Verifier;
use crate::services::schema::{build_query, SchemaLoader};
use crate::services::sessions::RequestRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<Verifier>,
    pub registry: Arc<RequestRegistry>,
    pub schemas: Arc<dyn SchemaLoader>,
}

impl AppState {
    pub fn new(
        config: Config,
        verifier: Verifier,
        registry: Arc<RequestRegistry>,
        schemas: Arc<dyn SchemaLoader>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            registry,
            schemas,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sign-in", get(sign_in))
        .route("/api/requests", post(create_request).get(list_requests))
        .route("/api/requests/:session_id", get(get_request))
        .route("/api/callback", post(callback))
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.registry.len(),
        networks: state.verifier.networks(),
        cached_keys: state.verifier.cached_keys(),
    })
}

/// Issues the configured sign-in request.
pub async fn sign_in(State(state): State<AppState>) -> Result<Json<ChallengeResponse>, AppError> {
    let default = &state.config.default_query;
    let query = build_query(&*state.schemas, &default.credential_query()).await?;
    let challenge = issue(&state, default.circuit_id, query)?;
    Ok(Json(challenge))
}

/// Issues a request for a caller-supplied query.
pub async fn create_request(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ChallengeResponse>), AppError> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let circuit_id: CircuitId = body.circuit_id.parse()?;
    let challenge = issue(&state, circuit_id, body.query)?;
    Ok((StatusCode::CREATED, Json(challenge)))
}

/// Lists outstanding requests.
pub async fn list_requests(State(state): State<AppState>) -> Json<Vec<RequestView>> {
    Json(state.registry.pending().iter().map(RequestView::from).collect())
}

/// Reads back one outstanding request.
pub async fn get_request(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<RequestView>, AppError> {
    state
        .registry
        .lookup(&session_id)
        .map(|issued| Json(RequestView::from(&issued)))
        .ok_or(AppError::SessionNotFound(session_id))
}

fn issue(
    state: &AppState,
    circuit_id: CircuitId,
    query: crate::protocol::query::Query,
) -> Result<ChallengeResponse, AppError> {
    let issued = state.registry.issue(circuit_id, query)?;
    tracing::info!(
        session = %issued.request.session_id,
        circuit = %circuit_id,
        operator = %issued.request.query.operator(),
        "Issued auth request"
    );
    Ok(ChallengeResponse::new(
        &issued,
        state.config.callback_url(),
        state.config.verifier_did.clone(),
    ))
}

/// Verifies a proof token against the session's request.
pub async fn callback(
    State(state): State<AppState>,
    params: Result<Query<CallbackParams>, QueryRejection>,
    body: Bytes,
) -> Result<Json<CallbackResponse>, AppError> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let request = state
        .registry
        .get(&params.session_id)
        .ok_or_else(|| AppError::SessionNotFound(params.session_id.clone()))?;

    let result = state.verifier.full_verify(&body, &request).await?;

    // A session authenticates once.
    if state.registry.consume(&params.session_id).is_none() {
        return Err(AppError::SessionNotFound(params.session_id));
    }

    Ok(Json(CallbackResponse {
        message: format!(
            "User with ID {} Successfully authenticated",
            result.authenticated_identifier
        ),
        identifier: result.authenticated_identifier,
        verified_at: result.verified_at,
    }))
}
