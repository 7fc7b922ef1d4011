//! Decimal encoding of BN254 field elements.
//!
//! Tokens, verification keys and issued requests all carry field elements
//! as canonical base-10 strings. Values at or above the modulus are
//! rejected rather than reduced.

use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

pub use ark_bn254::Fr;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("not a decimal integer: {0:?}")]
    NotDecimal(String),

    #[error("value is not below the field modulus: {0}")]
    OutOfRange(String),
}

/// Parses a canonical decimal string into a field element.
pub fn parse_decimal<F: PrimeField>(input: &str) -> Result<F, FieldError> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::NotDecimal(input.to_string()));
    }
    let value = BigUint::parse_bytes(input.as_bytes(), 10)
        .ok_or_else(|| FieldError::NotDecimal(input.to_string()))?;
    let modulus = BigUint::from_bytes_le(&F::MODULUS.to_bytes_le());
    if value >= modulus {
        return Err(FieldError::OutOfRange(input.to_string()));
    }
    Ok(F::from_le_bytes_mod_order(&value.to_bytes_le()))
}

pub fn to_decimal<F: PrimeField>(value: &F) -> String {
    BigUint::from_bytes_le(&value.into_bigint().to_bytes_le()).to_string()
}

/// 32-byte little-endian encoding of a scalar.
pub fn to_le_bytes(value: &Fr) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&value.into_bigint().to_bytes_le());
    out
}

/// Interprets up to 32 little-endian bytes as a scalar, failing when the
/// value does not fit below the modulus.
pub fn from_le_bytes(bytes: &[u8]) -> Option<Fr> {
    if bytes.len() > 32 {
        return None;
    }
    let value = BigUint::from_bytes_le(bytes);
    let modulus = BigUint::from_bytes_le(&Fr::MODULUS.to_bytes_le());
    (value < modulus).then(|| Fr::from_le_bytes_mod_order(bytes))
}

/// Field elements in JSON: always written as decimal strings, read from
/// either strings or plain integers.
pub mod serde_decimal {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum Repr {
        Text(String),
        Number(u64),
    }

    impl Repr {
        pub(super) fn into_field<E: serde::de::Error>(self) -> Result<Fr, E> {
            match self {
                Repr::Text(s) => parse_decimal(&s).map_err(E::custom),
                Repr::Number(n) => Ok(Fr::from(n)),
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_decimal(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        Repr::deserialize(deserializer)?.into_field()
    }
}

pub mod serde_decimal_vec {
    use super::serde_decimal::Repr;
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&to_decimal(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(Repr::into_field)
            .collect()
    }
}
