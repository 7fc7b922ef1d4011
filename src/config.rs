//! Configuration management

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::circuits::CircuitId;
use crate::protocol::field::{self, Fr};
use crate::protocol::query::Operator;
use crate::protocol::verifier::VerifyOptions;
use crate::services::schema::CredentialQuery;
use crate::services::RetryPolicy;

/// One chain a state resolver is configured for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    pub label: String,
    pub rpc_url: String,
    pub contract_address: String,
}

/// The request issued by `GET /api/sign-in`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultQueryConfig {
    pub circuit_id: CircuitId,
    pub context: String,
    pub credential_type: String,
    pub field: String,
    pub operator: Operator,
    pub values: Vec<Fr>,
}

impl DefaultQueryConfig {
    pub fn credential_query(&self) -> CredentialQuery {
        CredentialQuery {
            context: self.context.clone(),
            credential_type: self.credential_type.clone(),
            field: self.field.clone(),
            operator: self.operator,
            values: self.values.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub public_url: String,
    pub verifier_did: String,
    pub keys_dir: PathBuf,
    pub ipfs_gateway: String,
    pub resolvers: Vec<ResolverConfig>,
    pub state_transition_delay_secs: u64,
    pub proof_generation_delay_secs: u64,
    pub state_timeout_ms: u64,
    pub state_retries: u32,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
    pub default_query: DefaultQueryConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let resolvers = match get("STATE_RESOLVERS") {
            Some(table) => parse_resolvers(&table)?,
            None => vec![ResolverConfig {
                label: or("RESOLVER_PREFIX", "polygon:mumbai"),
                rpc_url: or("RPC_URL", "https://rpc-mumbai.maticvigil.com"),
                contract_address: or("STATE_CONTRACT_ADDRESS", "0xEA9aF2088B4a9770fC32A12fD42E61BDD317E655"),
            }],
        };

        Ok(Self {
            port: or("PORT", "8080").parse().context("Invalid PORT")?,

            public_url: or("PUBLIC_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),

            verifier_did: or(
                "VERIFIER_DID",
                "did:polygonid:polygon:mumbai:2qDyy1kEo2AYcP3RT4XGea7BtxsY285szg6yP9SPrs",
            ),

            keys_dir: PathBuf::from(or("KEYS_DIR", "./keys")),

            ipfs_gateway: or("IPFS_GATEWAY", "https://ipfs.io"),

            resolvers,

            state_transition_delay_secs: or("STATE_TRANSITION_DELAY_SECS", "300")
                .parse()
                .context("Invalid STATE_TRANSITION_DELAY_SECS")?,

            proof_generation_delay_secs: or("PROOF_GENERATION_DELAY_SECS", "86400")
                .parse()
                .context("Invalid PROOF_GENERATION_DELAY_SECS")?,

            state_timeout_ms: or("STATE_TIMEOUT_MS", "5000")
                .parse()
                .context("Invalid STATE_TIMEOUT_MS")?,

            state_retries: or("STATE_RETRIES", "3").parse().context("Invalid STATE_RETRIES")?,

            session_ttl_secs: or("SESSION_TTL_SECS", "900")
                .parse()
                .context("Invalid SESSION_TTL_SECS")?,

            max_sessions: or("MAX_SESSIONS", "10000").parse().context("Invalid MAX_SESSIONS")?,

            default_query: DefaultQueryConfig {
                circuit_id: or("QUERY_CIRCUIT_ID", "credentialAtomicQueryMTPV2")
                    .parse()
                    .map_err(|e| anyhow!("Invalid QUERY_CIRCUIT_ID: {}", e))?,
                context: or(
                    "QUERY_CONTEXT",
                    "https://raw.githubusercontent.com/iden3/claim-schema-vocab/main/schemas/json-ld/kyc-v3.json-ld",
                ),
                credential_type: or("QUERY_TYPE", "KYCAgeCredential"),
                field: or("QUERY_FIELD", "birthday"),
                operator: or("QUERY_OPERATOR", "$lt")
                    .parse()
                    .map_err(|e| anyhow!("Invalid QUERY_OPERATOR: {}", e))?,
                values: parse_values(&or("QUERY_VALUE", "20000101")).context("Invalid QUERY_VALUE")?,
            },
        })
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            accepted_state_transition_delay: Duration::from_secs(self.state_transition_delay_secs),
            accepted_proof_generation_delay: Duration::from_secs(self.proof_generation_delay_secs),
            now: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.state_retries,
            timeout: Duration::from_millis(self.state_timeout_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn callback_url(&self) -> String {
        format!("{}/api/callback", self.public_url)
    }
}

/// Parses `label=rpc_url@contract` entries separated by commas.
fn parse_resolvers(table: &str) -> Result<Vec<ResolverConfig>> {
    let resolvers = table
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (label, target) = entry
                .split_once('=')
                .with_context(|| format!("Resolver entry {:?} has no '='", entry))?;
            let (rpc_url, contract_address) = target
                .rsplit_once('@')
                .with_context(|| format!("Resolver entry {:?} has no '@contract'", entry))?;
            Ok(ResolverConfig {
                label: label.trim().to_string(),
                rpc_url: rpc_url.trim().to_string(),
                contract_address: contract_address.trim().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if resolvers.is_empty() {
        bail!("STATE_RESOLVERS is set but lists no resolvers");
    }
    Ok(resolvers)
}

/// Comma-separated decimal field elements.
fn parse_values(list: &str) -> Result<Vec<Fr>> {
    list.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| field::parse_decimal(v).map_err(|e| anyhow!("{:?}: {}", v, e)))
        .collect()
}
