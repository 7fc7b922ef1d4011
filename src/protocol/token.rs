//! Proof token envelope.
//!
//! Tokens use the compact JWZ form: three unpadded base64url segments
//! (`header.payload.zkp`). The header names the circuit, the payload is
//! the wallet's response message and the last segment holds a snarkjs
//! Groth16 proof with its public signals.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::circuits::CircuitId;
use super::field::{self, Fr};
use crate::error::VerifyError;

pub const PROVING_ALGORITHM: &str = "groth16";
pub const MEDIA_TYPE: &str = "application/iden3-zkp-json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(rename = "circuitId")]
    pub circuit_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crit: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

impl TokenHeader {
    pub fn new(circuit: CircuitId) -> Self {
        Self {
            alg: PROVING_ALGORITHM.to_string(),
            circuit_id: circuit.to_string(),
            crit: vec!["circuitId".to_string()],
            typ: Some(MEDIA_TYPE.to_string()),
        }
    }
}

/// Groth16 proof points in snarkjs layout, coordinates as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZkSegment {
    proof: Groth16Proof,
    pub_signals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProofToken {
    pub header: TokenHeader,
    pub circuit_id: CircuitId,
    pub payload: serde_json::Value,
    pub proof: Groth16Proof,
    pub public_signals: Vec<Fr>,
}

impl ProofToken {
    /// Decodes a compact token. Structure only; no cryptographic checks.
    pub fn parse(raw: &[u8]) -> Result<Self, VerifyError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| VerifyError::MalformedToken("token is not UTF-8".into()))?
            .trim();

        let segments: Vec<&str> = text.split('.').collect();
        if segments.len() != 3 {
            return Err(VerifyError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let header: TokenHeader = decode_segment(segments[0], "header")?;
        if header.alg != PROVING_ALGORITHM {
            return Err(VerifyError::MalformedToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        if !header.crit.is_empty() && !header.crit.iter().any(|c| c == "circuitId") {
            return Err(VerifyError::MalformedToken("crit must list circuitId".into()));
        }
        let circuit_id: CircuitId = header.circuit_id.parse()?;

        let payload: serde_json::Value = decode_segment(segments[1], "payload")?;
        if !payload.is_object() {
            return Err(VerifyError::MalformedToken("payload must be a JSON object".into()));
        }

        let zk: ZkSegment = decode_segment(segments[2], "proof")?;
        check_proof_shape(&zk.proof)?;

        let public_signals = zk
            .pub_signals
            .iter()
            .map(|s| field::parse_decimal(s))
            .collect::<Result<Vec<Fr>, _>>()
            .map_err(|e| VerifyError::MalformedToken(format!("public signal: {}", e)))?;
        if public_signals.len() != circuit_id.signal_count() {
            return Err(VerifyError::MalformedToken(format!(
                "{} expects {} public signals, got {}",
                circuit_id,
                circuit_id.signal_count(),
                public_signals.len()
            )));
        }

        Ok(Self {
            header,
            circuit_id,
            payload,
            proof: zk.proof,
            public_signals,
        })
    }

    /// The sender DID the wallet put in the response message, if any.
    pub fn sender(&self) -> Option<&str> {
        self.payload.get("from").and_then(|v| v.as_str())
    }

    pub fn to_compact(&self) -> Result<String, VerifyError> {
        let zk = ZkSegment {
            proof: self.proof.clone(),
            pub_signals: self.public_signals.iter().map(field::to_decimal).collect(),
        };
        Ok(format!(
            "{}.{}.{}",
            encode_segment(&self.header)?,
            encode_segment(&self.payload)?,
            encode_segment(&zk)?
        ))
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, VerifyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| VerifyError::MalformedToken(format!("{} is not base64url: {}", name, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::MalformedToken(format!("{} is not valid JSON: {}", name, e)))
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, VerifyError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| VerifyError::MalformedToken(format!("cannot encode segment: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn check_proof_shape(proof: &Groth16Proof) -> Result<(), VerifyError> {
    if let Some(protocol) = &proof.protocol {
        if protocol != PROVING_ALGORITHM {
            return Err(VerifyError::MalformedToken(format!("unsupported protocol {:?}", protocol)));
        }
    }
    if let Some(curve) = &proof.curve {
        if curve != "bn128" && curve != "bn254" {
            return Err(VerifyError::MalformedToken(format!("unsupported curve {:?}", curve)));
        }
    }
    let g1_ok = |p: &Vec<String>| p.len() == 3;
    let g2_ok = proof.pi_b.len() == 3 && proof.pi_b.iter().all(|c| c.len() == 2);
    if !g1_ok(&proof.pi_a) || !g2_ok || !g1_ok(&proof.pi_c) {
        return Err(VerifyError::MalformedToken("proof points have the wrong shape".into()));
    }
    Ok(())
}
