//! Identity state resolution.
//!
//! Issuers publish identity states to a state contract on the chain named
//! by their identifier. A proof may reference the latest state, a state
//! replaced recently enough, or the genesis state of an identity that has
//! never published.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{FetchError, RetryPolicy};
use crate::error::VerifyError;
use crate::protocol::field::Fr;
use crate::protocol::identity::Identifier;

/// On-chain record of a published state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    pub id: Fr,
    pub state: Fr,
    pub replaced_by_state: Fr,
    pub created_at_timestamp: u64,
    /// Zero while the state is the latest one.
    pub replaced_at_timestamp: u64,
}

#[async_trait]
pub trait StateResolver: Send + Sync {
    /// Looks up `state` for `id`. `Ok(None)` means it was never published.
    async fn state_info(&self, id: &Identifier, state: &Fr) -> Result<Option<StateInfo>, FetchError>;
}

/// Outcome of resolving one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedState {
    pub latest: bool,
    pub genesis: bool,
    /// When the state was replaced; zero for latest states.
    pub transition_timestamp: u64,
}

impl ResolvedState {
    pub fn latest() -> Self {
        Self { latest: true, genesis: false, transition_timestamp: 0 }
    }

    pub fn genesis() -> Self {
        Self { latest: true, genesis: true, transition_timestamp: 0 }
    }

    pub fn replaced_at(timestamp: u64) -> Self {
        Self { latest: false, genesis: false, transition_timestamp: timestamp }
    }

    /// A replaced state stays acceptable for `tolerance` after its
    /// replacement.
    pub fn check_freshness(&self, now: u64, tolerance: Duration) -> Result<(), VerifyError> {
        if self.latest {
            return Ok(());
        }
        let age = now.saturating_sub(self.transition_timestamp);
        if age > tolerance.as_secs() {
            return Err(VerifyError::StaleState(format!(
                "replaced {}s ago, accepted for {}s",
                age,
                tolerance.as_secs()
            )));
        }
        Ok(())
    }
}

/// Routes lookups to the resolver of the identity's network.
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn StateResolver>>,
    retry: RetryPolicy,
}

impl ResolverRegistry {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            resolvers: HashMap::new(),
            retry,
        }
    }

    pub fn register(&mut self, label: impl Into<String>, resolver: Arc<dyn StateResolver>) {
        self.resolvers.insert(label.into(), resolver);
    }

    pub fn with_resolver(mut self, label: impl Into<String>, resolver: Arc<dyn StateResolver>) -> Self {
        self.register(label, resolver);
        self
    }

    pub fn networks(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.resolvers.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub async fn resolve(&self, id: &Identifier, state: &Fr) -> Result<ResolvedState, VerifyError> {
        let label = id.network_label()?;
        let resolver = self
            .resolvers
            .get(&label)
            .ok_or_else(|| VerifyError::UnsupportedNetwork(label.clone()))?;

        let info = self
            .retry
            .run("state lookup", move || resolver.state_info(id, state))
            .await
            .map_err(|reason| {
                tracing::warn!(network = %label, %reason, "State lookup failed");
                VerifyError::StateNotFound(format!("lookup on {} failed: {}", label, reason))
            })?;

        match info {
            None if id.is_genesis_of(state) => {
                tracing::debug!(identity = %id, "Accepting unpublished genesis state");
                Ok(ResolvedState::genesis())
            }
            None => Err(VerifyError::StateNotFound(format!(
                "state of {} is neither published nor genesis",
                id
            ))),
            Some(info) if info.id != id.to_field() || info.state != *state => Err(
                VerifyError::StateNotFound(format!("resolver returned another identity's state for {}", id)),
            ),
            Some(info) if info.replaced_at_timestamp == 0 => Ok(ResolvedState::latest()),
            Some(info) => Ok(ResolvedState::replaced_at(info.replaced_at_timestamp)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Fixed(Mutex<Vec<Result<Option<StateInfo>, FetchError>>>);

    #[async_trait]
    impl StateResolver for Fixed {
        async fn state_info(&self, _: &Identifier, _: &Fr) -> Result<Option<StateInfo>, FetchError> {
            let mut answers = self.0.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            }
        }
    }

    fn registry(answers: Vec<Result<Option<StateInfo>, FetchError>>) -> ResolverRegistry {
        let policy = RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(100),
        };
        ResolverRegistry::new(policy).with_resolver("polygon:mumbai", Arc::new(Fixed(Mutex::new(answers))))
    }

    fn genesis_state() -> Fr {
        Fr::from(0x1234_5678_9abc_def0u64) * Fr::from(u64::MAX)
    }

    fn identity() -> Identifier {
        Identifier::from_genesis_state(0x02, 0x12, &genesis_state())
    }

    fn published(id: &Identifier, state: Fr, replaced_at: u64) -> StateInfo {
        StateInfo {
            id: id.to_field(),
            state,
            replaced_by_state: Fr::from(0u64),
            created_at_timestamp: 1,
            replaced_at_timestamp: replaced_at,
        }
    }

    #[tokio::test]
    async fn unpublished_genesis_state_is_latest() {
        let resolved = registry(vec![Ok(None)]).resolve(&identity(), &genesis_state()).await.unwrap();
        assert_eq!(resolved, ResolvedState::genesis());
    }

    #[tokio::test]
    async fn unpublished_non_genesis_state_is_not_found() {
        let result = registry(vec![Ok(None)]).resolve(&identity(), &Fr::from(99u64)).await;
        assert!(matches!(result, Err(VerifyError::StateNotFound(_))));
    }

    #[tokio::test]
    async fn replaced_state_reports_transition_time() {
        let state = Fr::from(7u64);
        let id = identity();
        let resolved = registry(vec![Ok(Some(published(&id, state, 1_000)))])
            .resolve(&id, &state)
            .await
            .unwrap();
        assert_eq!(resolved, ResolvedState::replaced_at(1_000));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_reported_as_not_found() {
        let state = Fr::from(7u64);
        let id = identity();
        let ok = registry(vec![Err(FetchError::Transient("reset".into())), Ok(Some(published(&id, state, 0)))])
            .resolve(&id, &state)
            .await;
        assert_eq!(ok, Ok(ResolvedState::latest()));

        let down = registry(vec![Err(FetchError::Transient("reset".into()))]).resolve(&id, &state).await;
        assert!(matches!(down, Err(VerifyError::StateNotFound(_))));
    }

    #[tokio::test]
    async fn unknown_network_has_no_resolver() {
        let id = Identifier::from_genesis_state(0x02, 0x21, &genesis_state());
        let result = registry(vec![Ok(None)]).resolve(&id, &genesis_state()).await;
        assert!(matches!(result, Err(VerifyError::UnsupportedNetwork(n)) if n == "ethereum:main"));
    }

    #[test]
    fn freshness_window() {
        let tolerance = Duration::from_secs(300);
        assert!(ResolvedState::latest().check_freshness(10_000, tolerance).is_ok());
        assert!(ResolvedState::replaced_at(9_800).check_freshness(10_000, tolerance).is_ok());
        assert!(ResolvedState::replaced_at(9_700).check_freshness(10_000, tolerance).is_ok());
        assert!(matches!(
            ResolvedState::replaced_at(9_699).check_freshness(10_000, tolerance),
            Err(VerifyError::StaleState(_))
        ));
    }
}
