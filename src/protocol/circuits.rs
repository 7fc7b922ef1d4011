//! Supported circuits and their public-signal layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::field::Fr;
use super::query::{DeclaredQuery, MAX_VALUES};
use crate::error::VerifyError;

pub const USER_ID: usize = 0;
pub const ISSUER_ID: usize = 1;
pub const ISSUER_STATE: usize = 2;
pub const ISSUER_NON_REV_STATE: usize = 3;
pub const IS_REVOCATION_CHECKED: usize = 4;
pub const TIMESTAMP: usize = 5;
pub const CLAIM_SCHEMA: usize = 6;
pub const CLAIM_PATH_KEY: usize = 7;
pub const OPERATOR: usize = 8;
pub const QUERY_HASH: usize = 9;
pub const VALUES: usize = 10;

/// Number of public signals of an atomic query circuit.
pub const SIGNAL_COUNT: usize = VALUES + MAX_VALUES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitId {
    /// Claim proven by inclusion in the issuer's claims tree.
    #[serde(rename = "credentialAtomicQueryMTPV2")]
    AtomicQueryMtpV2,
    /// Claim proven by the issuer's signature.
    #[serde(rename = "credentialAtomicQuerySigV2")]
    AtomicQuerySigV2,
}

/// Proof system a circuit's keys belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofBackend {
    Groth16Bn254,
}

impl CircuitId {
    pub const ALL: [CircuitId; 2] = [CircuitId::AtomicQueryMtpV2, CircuitId::AtomicQuerySigV2];

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitId::AtomicQueryMtpV2 => "credentialAtomicQueryMTPV2",
            CircuitId::AtomicQuerySigV2 => "credentialAtomicQuerySigV2",
        }
    }

    pub fn backend(&self) -> ProofBackend {
        match self {
            CircuitId::AtomicQueryMtpV2 | CircuitId::AtomicQuerySigV2 => ProofBackend::Groth16Bn254,
        }
    }

    pub fn signal_count(&self) -> usize {
        SIGNAL_COUNT
    }
}

impl FromStr for CircuitId {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| VerifyError::UnsupportedCircuit(s.to_string()))
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public signals of an atomic query proof, by meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicQuerySignals {
    pub user_id: Fr,
    pub issuer_id: Fr,
    /// Claim identity state (MTP) or issuer auth state (Sig).
    pub issuer_state: Fr,
    pub issuer_non_rev_state: Fr,
    pub is_revocation_checked: bool,
    pub timestamp: u64,
    pub query: DeclaredQuery,
}

impl AtomicQuerySignals {
    pub fn from_signals(circuit: CircuitId, signals: &[Fr]) -> Result<Self, VerifyError> {
        if signals.len() != circuit.signal_count() {
            return Err(VerifyError::MalformedToken(format!(
                "{} expects {} public signals, got {}",
                circuit,
                circuit.signal_count(),
                signals.len()
            )));
        }

        let is_revocation_checked = match signals[IS_REVOCATION_CHECKED] {
            v if v == Fr::from(0u64) => false,
            v if v == Fr::from(1u64) => true,
            _ => {
                return Err(VerifyError::MalformedToken(
                    "isRevocationChecked must be 0 or 1".into(),
                ))
            }
        };

        Ok(Self {
            user_id: signals[USER_ID],
            issuer_id: signals[ISSUER_ID],
            issuer_state: signals[ISSUER_STATE],
            issuer_non_rev_state: signals[ISSUER_NON_REV_STATE],
            is_revocation_checked,
            timestamp: small_integer(&signals[TIMESTAMP], "timestamp")?,
            query: DeclaredQuery {
                schema: signals[CLAIM_SCHEMA],
                claim_path_key: signals[CLAIM_PATH_KEY],
                operator: signals[OPERATOR],
                values: signals[VALUES..].to_vec(),
                query_hash: signals[QUERY_HASH],
            },
        })
    }
}

fn small_integer(value: &Fr, name: &str) -> Result<u64, VerifyError> {
    let bytes = super::field::to_le_bytes(value);
    if bytes[8..].iter().any(|b| *b != 0) {
        return Err(VerifyError::MalformedToken(format!("{} does not fit in 64 bits", name)));
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[..8]);
    Ok(u64::from_le_bytes(low))
}
