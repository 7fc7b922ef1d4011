//! Query predicates and the query matcher.
//!
//! A [`Query`] is what the verifier asks for; a [`DeclaredQuery`] is what a
//! proof's public signals claim was proven. Matching binds the two through
//! the query hash, so a valid proof for one query cannot be replayed
//! against another.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::field::{serde_decimal, serde_decimal_vec, Fr};
use super::hash;
use crate::error::VerifyError;

/// Number of value slots every query circuit carries.
pub const MAX_VALUES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Operator {
    /// No predicate; the circuit skips the comparison.
    Noop = 0,
    Eq = 1,
    Lt = 2,
    Gt = 3,
    In = 4,
    Nin = 5,
    Ne = 6,
}

impl Operator {
    pub const ALL: [Operator; 7] = [
        Operator::Noop,
        Operator::Eq,
        Operator::Lt,
        Operator::Gt,
        Operator::In,
        Operator::Nin,
        Operator::Ne,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_multi_valued(self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }

    pub fn is_single_valued(self) -> bool {
        matches!(self, Operator::Eq | Operator::Lt | Operator::Gt | Operator::Ne)
    }

    /// Operators that compare magnitudes rather than identity.
    pub fn is_ordering(self) -> bool {
        matches!(self, Operator::Lt | Operator::Gt)
    }

    /// Reads an operator out of a public signal.
    pub fn from_field(value: &Fr) -> Option<Self> {
        Self::ALL.into_iter().find(|op| Fr::from(op.code() as u64) == *value)
    }
}

impl TryFrom<u8> for Operator {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|op| op.code() == code)
            .ok_or_else(|| format!("unknown operator code {}", code))
    }
}

impl From<Operator> for u8 {
    fn from(op: Operator) -> u8 {
        op.code()
    }
}

impl FromStr for Operator {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('$').to_ascii_lowercase().as_str() {
            "noop" => Ok(Operator::Noop),
            "eq" => Ok(Operator::Eq),
            "lt" => Ok(Operator::Lt),
            "gt" => Ok(Operator::Gt),
            "in" => Ok(Operator::In),
            "nin" => Ok(Operator::Nin),
            "ne" => Ok(Operator::Ne),
            other => Err(VerifyError::InvalidQuery(format!("unknown operator {:?}", other))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Noop => "$noop",
            Operator::Eq => "$eq",
            Operator::Lt => "$lt",
            Operator::Gt => "$gt",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Ne => "$ne",
        };
        f.write_str(name)
    }
}

/// A validated query predicate. Construction enforces the value shape each
/// operator expects, so every `Query` in the system is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuery", into = "RawQuery")]
pub struct Query {
    schema: Fr,
    claim_path_key: Fr,
    operator: Operator,
    values: Vec<Fr>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuery {
    #[serde(with = "serde_decimal")]
    schema: Fr,
    #[serde(with = "serde_decimal")]
    claim_path_key: Fr,
    operator: Operator,
    #[serde(rename = "value", with = "serde_decimal_vec", default)]
    values: Vec<Fr>,
}

impl TryFrom<RawQuery> for Query {
    type Error = VerifyError;

    fn try_from(raw: RawQuery) -> Result<Self, Self::Error> {
        Query::new(raw.schema, raw.claim_path_key, raw.operator, raw.values)
    }
}

impl From<Query> for RawQuery {
    fn from(query: Query) -> Self {
        RawQuery {
            schema: query.schema,
            claim_path_key: query.claim_path_key,
            operator: query.operator,
            values: query.values,
        }
    }
}

impl Query {
    pub fn new(
        schema: Fr,
        claim_path_key: Fr,
        operator: Operator,
        values: Vec<Fr>,
    ) -> Result<Self, VerifyError> {
        if values.len() > MAX_VALUES {
            return Err(VerifyError::InvalidQuery(format!(
                "at most {} values allowed, got {}",
                MAX_VALUES,
                values.len()
            )));
        }
        match operator {
            Operator::Noop if !values.is_empty() => {
                return Err(VerifyError::InvalidQuery("$noop takes no values".into()));
            }
            op if op.is_single_valued() && values.len() != 1 => {
                return Err(VerifyError::InvalidQuery(format!(
                    "{} takes exactly one value, got {}",
                    op,
                    values.len()
                )));
            }
            op if op.is_multi_valued() && values.is_empty() => {
                return Err(VerifyError::InvalidQuery(format!("{} requires a non-empty value set", op)));
            }
            _ => {}
        }

        Ok(Self {
            schema,
            claim_path_key,
            operator,
            values,
        })
    }

    pub fn schema(&self) -> &Fr {
        &self.schema
    }

    pub fn claim_path_key(&self) -> &Fr {
        &self.claim_path_key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[Fr] {
        &self.values
    }

    /// The 64-slot value vector a circuit commits to for this query.
    pub fn canonical_values(&self) -> Vec<Fr> {
        canonical_values(self.operator, &self.values)
    }

    pub fn query_hash(&self) -> Fr {
        query_hash(&self.schema, &self.claim_path_key, self.operator, &self.values)
    }
}

/// Pads (or truncates) values to the slots the operator actually reads:
/// nothing for `$noop`, the first slot for single-valued operators and the
/// whole set for `$in`/`$nin`. Unused slots are zero.
pub fn canonical_values(operator: Operator, values: &[Fr]) -> Vec<Fr> {
    let used = match operator {
        Operator::Noop => 0,
        op if op.is_single_valued() => values.len().min(1),
        _ => values.len().min(MAX_VALUES),
    };
    let mut slots = vec![Fr::from(0u64); MAX_VALUES];
    slots[..used].copy_from_slice(&values[..used]);
    slots
}

pub fn query_hash(schema: &Fr, claim_path_key: &Fr, operator: Operator, values: &[Fr]) -> Fr {
    let values_hash = hash::hash(&canonical_values(operator, values));
    hash::hash(&[*schema, *claim_path_key, Fr::from(operator.code() as u64), values_hash])
}

/// The query a proof claims to satisfy, as read from its public signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQuery {
    pub schema: Fr,
    pub claim_path_key: Fr,
    pub operator: Fr,
    pub values: Vec<Fr>,
    pub query_hash: Fr,
}

/// Checks that a proof's declared query is exactly the requested one.
pub fn match_query(requested: &Query, declared: &DeclaredQuery) -> Result<(), VerifyError> {
    let operator = Operator::from_field(&declared.operator)
        .ok_or_else(|| VerifyError::QueryMismatch("proof declares an unknown operator".into()))?;

    if declared.query_hash != requested.query_hash() {
        return Err(VerifyError::QueryMismatch("query hash does not match the request".into()));
    }

    if operator != requested.operator {
        return Err(VerifyError::QueryMismatch(format!(
            "operator {} was proven, {} was requested",
            operator, requested.operator
        )));
    }
    if declared.schema != requested.schema {
        return Err(VerifyError::QueryMismatch("claim schema differs from the request".into()));
    }
    if declared.claim_path_key != requested.claim_path_key {
        return Err(VerifyError::QueryMismatch("claim path differs from the request".into()));
    }
    if canonical_values(operator, &declared.values) != requested.canonical_values() {
        return Err(VerifyError::QueryMismatch("compared values differ from the request".into()));
    }

    Ok(())
}
