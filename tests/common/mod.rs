//! Common test utilities shared across integration tests.
//!
//! Proofs come from a small atomic-query circuit with the production
//! public-signal layout: every signal is a public input, the claim value
//! is a private witness that must satisfy the declared operator, and the
//! query hash is recomputed from the declared query.

#![allow(dead_code)]

use ark_bn254::{Bn254, Fr};
use ark_crypto_primitives::sponge::constraints::CryptographicSpongeVar;
use ark_crypto_primitives::sponge::poseidon::constraints::PoseidonSpongeVar;
use ark_groth16::{Groth16, ProvingKey, VerifyingKey};
use ark_r1cs_std::{fields::fp::FpVar, prelude::*};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
use ark_std::rand::{rngs::StdRng, RngCore, SeedableRng};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use zkid_verifier::protocol::circuits::{
    CircuitId, CLAIM_PATH_KEY, CLAIM_SCHEMA, ISSUER_ID, ISSUER_NON_REV_STATE, ISSUER_STATE,
    IS_REVOCATION_CHECKED, OPERATOR, QUERY_HASH, SIGNAL_COUNT, TIMESTAMP, USER_ID, VALUES,
};
use zkid_verifier::protocol::groth16::SnarkjsVerifyingKey;
use zkid_verifier::protocol::hash;
use zkid_verifier::protocol::identity::Identifier;
use zkid_verifier::protocol::query::{Operator, Query, MAX_VALUES};
use zkid_verifier::protocol::token::{Groth16Proof, ProofToken, TokenHeader};
use zkid_verifier::protocol::{Verifier, VerifyOptions};
use zkid_verifier::services::keys::MemoryKeyLoader;
use zkid_verifier::services::schema::{schema_hash, SchemaLoader};
use zkid_verifier::services::state::{ResolverRegistry, StateInfo, StateResolver};
use zkid_verifier::services::{FetchError, RetryPolicy};
use zkid_verifier::VerifyError;

pub const NOW: i64 = 1_700_000_000;
pub const KYC_CONTEXT: &str =
    "https://raw.githubusercontent.com/iden3/claim-schema-vocab/main/schemas/json-ld/kyc-v3.json-ld";
pub const MUMBAI: u8 = 0x12;
pub const POLYGON_ID: u8 = 0x02;

/// Initialize test tracing (call once at the beginning of tests).
///
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("zkid_verifier=debug");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

pub fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(NOW, 0).unwrap()
}

pub fn options() -> VerifyOptions {
    VerifyOptions::default().at(now())
}

// ============================================================================
// Test circuit
// ============================================================================

#[derive(Clone)]
pub struct AtomicQueryCircuit {
    pub signals: Vec<Fr>,
    pub claim_value: Option<Fr>,
}

impl AtomicQueryCircuit {
    pub fn blank() -> Self {
        Self {
            signals: Vec::new(),
            claim_value: None,
        }
    }
}

impl ConstraintSynthesizer<Fr> for AtomicQueryCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let inputs = (0..SIGNAL_COUNT)
            .map(|i| {
                FpVar::new_input(cs.clone(), || {
                    self.signals.get(i).copied().ok_or(SynthesisError::AssignmentMissing)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let claim = FpVar::new_witness(cs.clone(), || {
            self.claim_value.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let values = &inputs[VALUES..];
        let eq = claim.is_eq(&values[0])?;
        let lt = claim.is_cmp(&values[0], Ordering::Less, false)?;
        let gt = lt.not().and(&eq.not())?;
        let member = Boolean::kary_or(
            &values
                .iter()
                .map(|v| claim.is_eq(v))
                .collect::<Result<Vec<_>, _>>()?,
        )?;

        // Indexed by operator code.
        let outcomes = [
            Boolean::TRUE,
            eq.clone(),
            lt,
            gt,
            member.clone(),
            member.not(),
            eq.not(),
        ];

        let mut selected = FpVar::<Fr>::zero();
        for (code, outcome) in outcomes.iter().enumerate() {
            let chosen = inputs[OPERATOR].is_eq(&FpVar::constant(Fr::from(code as u64)))?;
            selected += FpVar::from(chosen.and(outcome)?);
        }
        selected.enforce_equal(&FpVar::one())?;

        // Unused value slots are zeroed before hashing, as the verifier does.
        let operator = &inputs[OPERATOR];
        let is_noop = operator.is_eq(&operator_constant(Operator::Noop))?;
        let is_multi = operator
            .is_eq(&operator_constant(Operator::In))?
            .or(&operator.is_eq(&operator_constant(Operator::Nin))?)?;
        let canonical = values
            .iter()
            .enumerate()
            .map(|(slot, value)| {
                let used = if slot == 0 { is_noop.not() } else { is_multi.clone() };
                used.select(value, &FpVar::zero())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let values_hash = poseidon(cs.clone(), &canonical)?;
        let query_hash = poseidon(
            cs,
            &[
                inputs[CLAIM_SCHEMA].clone(),
                inputs[CLAIM_PATH_KEY].clone(),
                operator.clone(),
                values_hash,
            ],
        )?;
        query_hash.enforce_equal(&inputs[QUERY_HASH])
    }
}

fn operator_constant(operator: Operator) -> FpVar<Fr> {
    FpVar::constant(Fr::from(operator.code() as u64))
}

/// In-circuit counterpart of `protocol::hash::hash`.
fn poseidon(cs: ConstraintSystemRef<Fr>, inputs: &[FpVar<Fr>]) -> Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::new(cs, hash::config());
    sponge.absorb(&FpVar::constant(Fr::from(inputs.len() as u64)))?;
    sponge.absorb(&inputs)?;
    Ok(sponge.squeeze_field_elements(1)?.remove(0))
}

fn setup() -> &'static (ProvingKey<Bn254>, VerifyingKey<Bn254>) {
    static SETUP: OnceLock<(ProvingKey<Bn254>, VerifyingKey<Bn254>)> = OnceLock::new();
    SETUP.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(ark_std::test_rng().next_u64());
        Groth16::<Bn254>::circuit_specific_setup(AtomicQueryCircuit::blank(), &mut rng)
            .expect("trusted setup")
    })
}

pub fn verification_key() -> Vec<u8> {
    serde_json::to_vec(&SnarkjsVerifyingKey::from_ark(&setup().1)).unwrap()
}

pub fn key_loader() -> MemoryKeyLoader {
    CircuitId::ALL
        .into_iter()
        .fold(MemoryKeyLoader::new(), |loader, circuit| loader.with_key(circuit, verification_key()))
}

pub fn prove(signals: &[Fr], claim_value: Fr) -> Groth16Proof {
    let circuit = AtomicQueryCircuit {
        signals: signals.to_vec(),
        claim_value: Some(claim_value),
    };
    let mut rng = StdRng::seed_from_u64(ark_std::test_rng().next_u64());
    let proof = Groth16::<Bn254>::prove(&setup().0, circuit, &mut rng).expect("proof");
    Groth16Proof::from_ark(&proof)
}

// ============================================================================
// Identities and queries
// ============================================================================

pub fn issuer_genesis_state() -> Fr {
    Fr::from(0x5eed_0001_u64) * Fr::from(u64::MAX) * Fr::from(u64::MAX) * Fr::from(u64::MAX)
}

pub fn issuer() -> Identifier {
    Identifier::from_genesis_state(POLYGON_ID, MUMBAI, &issuer_genesis_state())
}

/// A state the issuer published after genesis.
pub fn issuer_state() -> Fr {
    Fr::from(0x1ead_beefu64) * Fr::from(u64::MAX)
}

pub fn user() -> Identifier {
    let state = Fr::from(0x0bad_cafeu64) * Fr::from(u64::MAX) * Fr::from(u64::MAX) * Fr::from(u64::MAX);
    Identifier::from_genesis_state(POLYGON_ID, MUMBAI, &state)
}

pub fn birthday_path() -> Fr {
    Fr::from(20376033832371109u64)
}

pub fn query(operator: Operator, values: &[u64]) -> Query {
    Query::new(
        schema_hash(KYC_CONTEXT, "KYCAgeCredential"),
        birthday_path(),
        operator,
        values.iter().map(|v| Fr::from(*v)).collect(),
    )
    .unwrap()
}

/// Inputs of one proof, defaulting to a fresh LT birthday proof.
#[derive(Clone)]
pub struct ProofInputs {
    pub circuit: CircuitId,
    pub user: Identifier,
    pub issuer: Identifier,
    pub issuer_state: Fr,
    pub non_rev_state: Fr,
    pub revocation_checked: bool,
    pub timestamp: u64,
    pub query: Query,
    /// Values written into the signal slots; the query's canonical values
    /// when unset.
    pub declared_values: Option<Vec<Fr>>,
    pub claim_value: u64,
}

impl Default for ProofInputs {
    fn default() -> Self {
        Self {
            circuit: CircuitId::AtomicQueryMtpV2,
            user: user(),
            issuer: issuer(),
            issuer_state: issuer_state(),
            non_rev_state: issuer_state(),
            revocation_checked: true,
            timestamp: NOW as u64 - 60,
            query: query(Operator::Lt, &[20020101]),
            declared_values: None,
            claim_value: 19990101,
        }
    }
}

impl ProofInputs {
    pub fn signals(&self) -> Vec<Fr> {
        let mut signals = vec![Fr::from(0u64); SIGNAL_COUNT];
        signals[USER_ID] = self.user.to_field();
        signals[ISSUER_ID] = self.issuer.to_field();
        signals[ISSUER_STATE] = self.issuer_state;
        signals[ISSUER_NON_REV_STATE] = self.non_rev_state;
        signals[IS_REVOCATION_CHECKED] = Fr::from(self.revocation_checked as u64);
        signals[TIMESTAMP] = Fr::from(self.timestamp);
        signals[CLAIM_SCHEMA] = *self.query.schema();
        signals[CLAIM_PATH_KEY] = *self.query.claim_path_key();
        signals[OPERATOR] = Fr::from(self.query.operator().code() as u64);
        signals[QUERY_HASH] = self.query.query_hash();

        let mut values = self
            .declared_values
            .clone()
            .unwrap_or_else(|| self.query.canonical_values());
        values.resize(MAX_VALUES, Fr::from(0u64));
        signals[VALUES..].copy_from_slice(&values);
        signals
    }

    pub fn circuit(&self) -> AtomicQueryCircuit {
        AtomicQueryCircuit {
            signals: self.signals(),
            claim_value: Some(Fr::from(self.claim_value)),
        }
    }

    pub fn token(&self) -> String {
        let signals = self.signals();
        let proof = prove(&signals, Fr::from(self.claim_value));
        token_with(self.circuit, proof, signals)
    }
}

pub fn token_with(circuit: CircuitId, proof: Groth16Proof, public_signals: Vec<Fr>) -> String {
    ProofToken {
        header: TokenHeader::new(circuit),
        circuit_id: circuit,
        payload: json!({
            "typ": "application/iden3comm-plain-json",
            "type": "https://iden3-communication.io/authorization/1.0/response",
            "body": {"message": "sign in"}
        }),
        proof,
        public_signals,
    }
    .to_compact()
    .unwrap()
}

// ============================================================================
// Collaborators
// ============================================================================

/// State contract double keyed by `(identity, state)`.
#[derive(Default)]
pub struct MemoryStateResolver {
    states: Mutex<HashMap<(Identifier, Vec<u8>), StateInfo>>,
    pub lookups: AtomicUsize,
    pub failures_left: AtomicUsize,
}

impl MemoryStateResolver {
    pub fn publish(&self, id: &Identifier, state: Fr, replaced_at: u64) {
        let info = StateInfo {
            id: id.to_field(),
            state,
            replaced_by_state: Fr::from(0u64),
            created_at_timestamp: 1,
            replaced_at_timestamp: replaced_at,
        };
        self.states.lock().unwrap().insert(key(id, &state), info);
    }

    pub fn fail_next(&self, times: usize) {
        self.failures_left.store(times, AtomicOrdering::SeqCst);
    }
}

fn key(id: &Identifier, state: &Fr) -> (Identifier, Vec<u8>) {
    (*id, zkid_verifier::protocol::field::to_le_bytes(state).to_vec())
}

#[async_trait]
impl StateResolver for MemoryStateResolver {
    async fn state_info(&self, id: &Identifier, state: &Fr) -> Result<Option<StateInfo>, FetchError> {
        self.lookups.fetch_add(1, AtomicOrdering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::Transient("connection reset".into()));
        }
        Ok(self.states.lock().unwrap().get(&key(id, state)).cloned())
    }
}

pub struct StaticSchemaLoader(pub Arc<Value>);

#[async_trait]
impl SchemaLoader for StaticSchemaLoader {
    async fn load(&self, uri: &str) -> Result<Arc<Value>, VerifyError> {
        if uri != KYC_CONTEXT {
            return Err(VerifyError::SchemaFetch(format!("{}: HTTP 404 Not Found", uri)));
        }
        Ok(Arc::clone(&self.0))
    }
}

pub fn kyc_schema() -> Value {
    json!({
        "@context": [{
            "@version": 1.1,
            "@protected": true,
            "id": "@id",
            "type": "@type",
            "KYCAgeCredential": {
                "@id": "https://raw.githubusercontent.com/iden3/claim-schema-vocab/main/schemas/json-ld/kyc-v3.json-ld#KYCAgeCredential",
                "@context": {
                    "@version": 1.1,
                    "@protected": true,
                    "id": "@id",
                    "type": "@type",
                    "kyc-vocab": "https://github.com/iden3/claim-schema-vocab/blob/main/credentials/kyc.md#",
                    "xsd": "http://www.w3.org/2001/XMLSchema#",
                    "birthday": {"@id": "kyc-vocab:birthday", "@type": "xsd:integer"},
                    "documentType": {"@id": "kyc-vocab:documentType", "@type": "xsd:integer"}
                }
            },
            "KYCCountryOfResidenceCredential": {
                "@id": "https://raw.githubusercontent.com/iden3/claim-schema-vocab/main/schemas/json-ld/kyc-v3.json-ld#KYCCountryOfResidenceCredential",
                "@context": {
                    "@version": 1.1,
                    "kyc-vocab": "https://github.com/iden3/claim-schema-vocab/blob/main/credentials/kyc.md#",
                    "xsd": "http://www.w3.org/2001/XMLSchema#",
                    "countryCode": {"@id": "kyc-vocab:countryCode", "@type": "xsd:integer"}
                }
            }
        }]
    })
}

pub fn quick_retries() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
        timeout: Duration::from_millis(200),
    }
}

/// A verifier wired to in-memory keys and chain state, with the issuer's
/// current state already published.
pub struct Fixture {
    pub verifier: Verifier,
    pub states: Arc<MemoryStateResolver>,
}

pub fn fixture() -> Fixture {
    fixture_with_keys(key_loader())
}

pub fn fixture_with_keys(keys: MemoryKeyLoader) -> Fixture {
    let states = Arc::new(MemoryStateResolver::default());
    states.publish(&issuer(), issuer_state(), 0);

    let resolvers = ResolverRegistry::new(quick_retries())
        .with_resolver("polygon:mumbai", Arc::clone(&states) as Arc<dyn StateResolver>);
    let verifier = Verifier::new(Arc::new(keys), resolvers).with_options(options());

    Fixture { verifier, states }
}
