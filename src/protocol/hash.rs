//! Poseidon sponge over the BN254 scalar field.
//!
//! Width 3 (rate 2, capacity 1), x^5 S-box, 8 full and 57 partial rounds,
//! with round constants and MDS matrix from the Grain LFSR of the Poseidon
//! paper. The query hash signal of every supported circuit is defined over
//! this function, and circuits recompute it with the matching
//! `PoseidonSpongeVar` gadget.

use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge};
use ark_crypto_primitives::sponge::{CryptographicSponge, FieldBasedCryptographicSponge};
use ark_ff::PrimeField;
use std::sync::OnceLock;

use super::field::Fr;

pub const RATE: usize = 2;
pub const CAPACITY: usize = 1;
pub const FULL_ROUNDS: usize = 8;
pub const PARTIAL_ROUNDS: usize = 57;
pub const ALPHA: u64 = 5;

/// Sponge parameters shared by the native hash and circuit gadgets.
pub fn config() -> &'static PoseidonConfig<Fr> {
    static CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            Fr::MODULUS_BIT_SIZE as u64,
            RATE,
            FULL_ROUNDS as u64,
            PARTIAL_ROUNDS as u64,
            0,
        );
        PoseidonConfig::new(FULL_ROUNDS, PARTIAL_ROUNDS, ALPHA, mds, ark, RATE, CAPACITY)
    })
}

/// Hashes a sequence of field elements. The input length is absorbed
/// first, so inputs that differ only by trailing zeros do not collide.
pub fn hash(inputs: &[Fr]) -> Fr {
    let mut sponge = PoseidonSponge::new(config());
    sponge.absorb(&Fr::from(inputs.len() as u64));
    sponge.absorb(&inputs);
    sponge.squeeze_native_field_elements(1).remove(0)
}
