//! End-to-end verification of a proof token against an issued request.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::circuits::AtomicQuerySignals;
use super::groth16::CircuitVerifier;
use super::identity::Identifier;
use super::query::match_query;
use super::token::ProofToken;
use crate::error::VerifyError;
use crate::services::keys::KeyLoader;
use crate::services::sessions::AuthRequest;
use crate::services::state::ResolverRegistry;

/// Progress of one verification. The first failing step ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    Parsed,
    ProofVerified,
    QueryMatched,
    StateValid,
    Authenticated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// How long a replaced issuer state remains acceptable.
    pub accepted_state_transition_delay: Duration,
    /// Maximum age of a proof, measured from its timestamp signal.
    pub accepted_proof_generation_delay: Duration,
    /// Evaluation instant; the wall clock when unset.
    pub now: Option<DateTime<Utc>>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            accepted_state_transition_delay: Duration::from_secs(5 * 60),
            accepted_proof_generation_delay: Duration::from_secs(24 * 60 * 60),
            now: None,
        }
    }
}

impl VerifyOptions {
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// DID of the proving user.
    pub authenticated_identifier: String,
    pub verified_at: DateTime<Utc>,
}

pub struct Verifier {
    circuits: CircuitVerifier,
    resolvers: ResolverRegistry,
    options: VerifyOptions,
}

impl Verifier {
    pub fn new(keys: Arc<dyn KeyLoader>, resolvers: ResolverRegistry) -> Self {
        Self {
            circuits: CircuitVerifier::new(keys),
            resolvers,
            options: VerifyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    pub fn networks(&self) -> Vec<String> {
        self.resolvers.networks()
    }

    pub fn cached_keys(&self) -> usize {
        self.circuits.cached_keys()
    }

    /// Verifies `token` against `request` with the configured options.
    pub async fn full_verify(
        &self,
        token: &[u8],
        request: &AuthRequest,
    ) -> Result<VerificationResult, VerifyError> {
        self.full_verify_with(token, request, &self.options).await
    }

    pub async fn full_verify_with(
        &self,
        token: &[u8],
        request: &AuthRequest,
        options: &VerifyOptions,
    ) -> Result<VerificationResult, VerifyError> {
        let mut stage = Stage::Start;
        let outcome = self.run(token, request, options, &mut stage).await;

        match &outcome {
            Ok(result) => tracing::info!(
                session = %request.session_id,
                identifier = %result.authenticated_identifier,
                "Authenticated"
            ),
            Err(e) => tracing::warn!(
                session = %request.session_id,
                %stage,
                kind = e.kind(),
                "Verification failed: {}",
                e
            ),
        }
        outcome
    }

    async fn run(
        &self,
        raw: &[u8],
        request: &AuthRequest,
        options: &VerifyOptions,
        stage: &mut Stage,
    ) -> Result<VerificationResult, VerifyError> {
        let now = options.now.unwrap_or_else(Utc::now);
        let now_secs = u64::try_from(now.timestamp()).unwrap_or(0);

        let token = ProofToken::parse(raw)?;
        if token.circuit_id != request.circuit_id {
            return Err(VerifyError::QueryMismatch(format!(
                "request expects {}, token carries {}",
                request.circuit_id, token.circuit_id
            )));
        }
        advance(stage, Stage::Parsed, request);

        let signals = self.circuits.verify(&token).await?;
        let user = Identifier::from_field(&signals.user_id)?;
        advance(stage, Stage::ProofVerified, request);

        match_query(&request.query, &signals.query)?;
        advance(stage, Stage::QueryMatched, request);

        let age = now_secs.saturating_sub(signals.timestamp);
        if age > options.accepted_proof_generation_delay.as_secs() {
            return Err(VerifyError::ProofExpired { age_secs: age });
        }
        self.check_issuer_states(&signals, now_secs, options).await?;
        advance(stage, Stage::StateValid, request);

        advance(stage, Stage::Authenticated, request);
        Ok(VerificationResult {
            authenticated_identifier: user.did(),
            verified_at: now,
        })
    }

    async fn check_issuer_states(
        &self,
        signals: &AtomicQuerySignals,
        now: u64,
        options: &VerifyOptions,
    ) -> Result<(), VerifyError> {
        let issuer = Identifier::from_field(&signals.issuer_id)?;
        let tolerance = options.accepted_state_transition_delay;

        self.resolvers
            .resolve(&issuer, &signals.issuer_state)
            .await?
            .check_freshness(now, tolerance)?;

        if signals.is_revocation_checked && signals.issuer_non_rev_state != signals.issuer_state {
            self.resolvers
                .resolve(&issuer, &signals.issuer_non_rev_state)
                .await?
                .check_freshness(now, tolerance)?;
        }
        Ok(())
    }
}

fn advance(stage: &mut Stage, next: Stage, request: &AuthRequest) {
    *stage = next;
    tracing::debug!(session = %request.session_id, stage = %next, "Verification progressed");
}
