//! Groth16 verification over BN254 for snarkjs-encoded keys and proofs.

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::{One, Zero};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_snark::SNARK;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::circuits::{AtomicQuerySignals, CircuitId, ProofBackend};
use super::field;
use super::token::{Groth16Proof, ProofToken, PROVING_ALGORITHM};
use crate::error::VerifyError;
use crate::services::keys::KeyLoader;

/// snarkjs `verification_key.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnarkjsVerifyingKey {
    pub protocol: String,
    pub curve: String,
    #[serde(rename = "nPublic")]
    pub n_public: usize,
    pub vk_alpha_1: Vec<String>,
    pub vk_beta_2: Vec<Vec<String>>,
    pub vk_gamma_2: Vec<Vec<String>>,
    pub vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    pub ic: Vec<Vec<String>>,
}

impl SnarkjsVerifyingKey {
    pub fn from_ark(vk: &VerifyingKey<Bn254>) -> Self {
        Self {
            protocol: PROVING_ALGORITHM.to_string(),
            curve: "bn128".to_string(),
            n_public: vk.gamma_abc_g1.len().saturating_sub(1),
            vk_alpha_1: encode_g1(&vk.alpha_g1),
            vk_beta_2: encode_g2(&vk.beta_g2),
            vk_gamma_2: encode_g2(&vk.gamma_g2),
            vk_delta_2: encode_g2(&vk.delta_g2),
            ic: vk.gamma_abc_g1.iter().map(encode_g1).collect(),
        }
    }

    pub fn to_ark(&self) -> Result<VerifyingKey<Bn254>, String> {
        if self.protocol != PROVING_ALGORITHM {
            return Err(format!("unsupported protocol {:?}", self.protocol));
        }
        if self.curve != "bn128" && self.curve != "bn254" {
            return Err(format!("unsupported curve {:?}", self.curve));
        }
        if self.ic.len() != self.n_public + 1 {
            return Err(format!(
                "IC has {} points for {} public inputs",
                self.ic.len(),
                self.n_public
            ));
        }

        Ok(VerifyingKey {
            alpha_g1: decode_g1(&self.vk_alpha_1)?,
            beta_g2: decode_g2(&self.vk_beta_2)?,
            gamma_g2: decode_g2(&self.vk_gamma_2)?,
            delta_g2: decode_g2(&self.vk_delta_2)?,
            gamma_abc_g1: self
                .ic
                .iter()
                .map(|p| decode_g1(p))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

impl Groth16Proof {
    pub fn from_ark(proof: &Proof<Bn254>) -> Self {
        Self {
            pi_a: encode_g1(&proof.a),
            pi_b: encode_g2(&proof.b),
            pi_c: encode_g1(&proof.c),
            protocol: Some(PROVING_ALGORITHM.to_string()),
            curve: Some("bn128".to_string()),
        }
    }

    pub fn to_ark(&self) -> Result<Proof<Bn254>, String> {
        Ok(Proof {
            a: decode_g1(&self.pi_a)?,
            b: decode_g2(&self.pi_b)?,
            c: decode_g1(&self.pi_c)?,
        })
    }
}

fn coordinate(text: &str) -> Result<Fq, String> {
    field::parse_decimal(text).map_err(|e| e.to_string())
}

fn decode_g1(coords: &[String]) -> Result<G1Affine, String> {
    let [x, y, z] = coords else {
        return Err(format!("G1 point needs 3 coordinates, got {}", coords.len()));
    };
    let z = coordinate(z)?;
    if z.is_zero() {
        return Ok(G1Affine::zero());
    }
    if !z.is_one() {
        return Err("G1 point is not normalised".into());
    }
    let point = G1Affine::new_unchecked(coordinate(x)?, coordinate(y)?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err("G1 point is not on the curve".into());
    }
    Ok(point)
}

fn decode_fq2(pair: &[String]) -> Result<Fq2, String> {
    let [c0, c1] = pair else {
        return Err(format!("Fq2 element needs 2 coordinates, got {}", pair.len()));
    };
    Ok(Fq2::new(coordinate(c0)?, coordinate(c1)?))
}

fn decode_g2(coords: &[Vec<String>]) -> Result<G2Affine, String> {
    let [x, y, z] = coords else {
        return Err(format!("G2 point needs 3 coordinates, got {}", coords.len()));
    };
    let z = decode_fq2(z)?;
    if z.is_zero() {
        return Ok(G2Affine::zero());
    }
    if !z.is_one() {
        return Err("G2 point is not normalised".into());
    }
    let point = G2Affine::new_unchecked(decode_fq2(x)?, decode_fq2(y)?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err("G2 point is not on the curve".into());
    }
    Ok(point)
}

fn encode_g1(point: &G1Affine) -> Vec<String> {
    if point.infinity {
        return vec!["0".into(), "1".into(), "0".into()];
    }
    vec![field::to_decimal(&point.x), field::to_decimal(&point.y), "1".into()]
}

fn encode_g2(point: &G2Affine) -> Vec<Vec<String>> {
    let pair = |v: &Fq2| vec![field::to_decimal(&v.c0), field::to_decimal(&v.c1)];
    if point.infinity {
        return vec![
            vec!["0".into(), "0".into()],
            vec!["1".into(), "0".into()],
            vec!["0".into(), "0".into()],
        ];
    }
    vec![pair(&point.x), pair(&point.y), vec!["1".into(), "0".into()]]
}

/// Decodes a circuit's verification key document and checks it fits the
/// circuit's public-signal layout.
pub fn decode_verifying_key(
    circuit: CircuitId,
    bytes: &[u8],
) -> Result<VerifyingKey<Bn254>, VerifyError> {
    let invalid = |reason: String| VerifyError::InvalidVerificationKey {
        circuit: circuit.to_string(),
        reason,
    };
    let document: SnarkjsVerifyingKey =
        serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;
    if document.n_public != circuit.signal_count() {
        return Err(invalid(format!(
            "key has {} public inputs, circuit has {}",
            document.n_public,
            circuit.signal_count()
        )));
    }
    document.to_ark().map_err(invalid)
}

/// Verifies embedded proofs against per-circuit keys. Prepared keys are
/// cached after the first load.
pub struct CircuitVerifier {
    loader: Arc<dyn KeyLoader>,
    keys: DashMap<CircuitId, Arc<PreparedVerifyingKey<Bn254>>>,
}

impl CircuitVerifier {
    pub fn new(loader: Arc<dyn KeyLoader>) -> Self {
        Self {
            loader,
            keys: DashMap::new(),
        }
    }

    async fn prepared_key(
        &self,
        circuit: CircuitId,
    ) -> Result<Arc<PreparedVerifyingKey<Bn254>>, VerifyError> {
        if let Some(key) = self.keys.get(&circuit) {
            return Ok(Arc::clone(key.value()));
        }

        let bytes = self.loader.load(circuit).await?;
        let key = Arc::new(prepare_verifying_key(&decode_verifying_key(circuit, &bytes)?));
        tracing::info!(circuit = %circuit, "Loaded verification key");
        self.keys.insert(circuit, Arc::clone(&key));
        Ok(key)
    }

    pub fn cached_keys(&self) -> usize {
        self.keys.len()
    }

    /// Checks the token's proof and interprets its public signals.
    pub async fn verify(&self, token: &ProofToken) -> Result<AtomicQuerySignals, VerifyError> {
        let pvk = match token.circuit_id.backend() {
            ProofBackend::Groth16Bn254 => self.prepared_key(token.circuit_id).await?,
        };
        let proof = token.proof.to_ark().map_err(|reason| {
            tracing::debug!(%reason, "Rejecting undecodable proof");
            VerifyError::InvalidProof
        })?;
        let inputs: Vec<Fr> = token.public_signals.clone();

        let valid = tokio::task::spawn_blocking(move || {
            Groth16::<Bn254>::verify_with_processed_vk(&pvk, &inputs, &proof)
        })
        .await
        .map_err(|e| {
            tracing::error!("Proof verification task failed: {}", e);
            VerifyError::InvalidProof
        })?
        .map_err(|e| {
            tracing::debug!("Pairing check errored: {}", e);
            VerifyError::InvalidProof
        })?;

        if !valid {
            return Err(VerifyError::InvalidProof);
        }

        AtomicQuerySignals::from_signals(token.circuit_id, &token.public_signals)
    }
}
