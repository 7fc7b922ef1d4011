//! Identity identifiers carried in public signals.
//!
//! Layout of the 31 identifier bytes (little-endian inside the field
//! element): `[0]` DID method, `[1]` blockchain | network, `[2..29]` genesis
//! bytes, `[29..31]` checksum.

use std::fmt;

use super::field::{self, Fr};
use crate::error::VerifyError;

pub const ID_LENGTH: usize = 31;
const GENESIS_LENGTH: usize = 27;
const CHECKSUM_OFFSET: usize = 2 + GENESIS_LENGTH;

const METHODS: &[(u8, &str)] = &[(0x01, "iden3"), (0x02, "polygonid")];

/// Blockchain in the high nibble, network in the low nibble.
const NETWORKS: &[(u8, &str, &str)] = &[
    (0x11, "polygon", "main"),
    (0x12, "polygon", "mumbai"),
    (0x21, "ethereum", "main"),
    (0x23, "ethereum", "goerli"),
];

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier([u8; ID_LENGTH]);

impl Identifier {
    /// Decodes an identifier from a public signal, validating its checksum.
    pub fn from_field(value: &Fr) -> Result<Self, VerifyError> {
        let bytes = field::to_le_bytes(value);
        if bytes[ID_LENGTH] != 0 {
            return Err(VerifyError::MalformedToken(
                "identifier signal is wider than 31 bytes".into(),
            ));
        }
        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(&bytes[..ID_LENGTH]);
        if id[CHECKSUM_OFFSET..] != checksum(&id[..CHECKSUM_OFFSET]) {
            return Err(VerifyError::MalformedToken("identifier checksum mismatch".into()));
        }
        Ok(Self(id))
    }

    /// The identifier an identity has while its state is still the genesis
    /// state.
    pub fn from_genesis_state(method: u8, network: u8, state: &Fr) -> Self {
        let mut id = [0u8; ID_LENGTH];
        id[0] = method;
        id[1] = network;
        id[2..CHECKSUM_OFFSET].copy_from_slice(&genesis_bytes(state));
        let sum = checksum(&id[..CHECKSUM_OFFSET]);
        id[CHECKSUM_OFFSET..].copy_from_slice(&sum);
        Self(id)
    }

    pub fn to_field(&self) -> Fr {
        // 31 bytes always fit below the modulus.
        field::from_le_bytes(&self.0)
            .unwrap_or_else(|| unreachable!("31-byte identifiers are below the field modulus"))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn method_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn network_byte(&self) -> u8 {
        self.0[1]
    }

    pub fn is_genesis_of(&self, state: &Fr) -> bool {
        self.0[2..CHECKSUM_OFFSET] == genesis_bytes(state)
    }

    /// Resolver label of the chain this identity publishes its state to,
    /// such as `polygon:mumbai`.
    pub fn network_label(&self) -> Result<String, VerifyError> {
        NETWORKS
            .iter()
            .find(|(flag, _, _)| *flag == self.network_byte())
            .map(|(_, chain, network)| format!("{}:{}", chain, network))
            .ok_or_else(|| {
                VerifyError::UnsupportedNetwork(format!("network flag 0x{:02x}", self.network_byte()))
            })
    }

    pub fn did(&self) -> String {
        let method = METHODS
            .iter()
            .find(|(byte, _)| *byte == self.method_byte())
            .map(|(_, name)| *name)
            .unwrap_or("unknown");
        let network = self
            .network_label()
            .unwrap_or_else(|_| "unknown:unknown".to_string());
        format!("did:{}:{}:{}", method, network, bs58::encode(self.0).into_string())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.did())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", hex::encode(self.0))
    }
}

fn genesis_bytes(state: &Fr) -> [u8; GENESIS_LENGTH] {
    let bytes = field::to_le_bytes(state);
    let mut genesis = [0u8; GENESIS_LENGTH];
    genesis.copy_from_slice(&bytes[32 - GENESIS_LENGTH..]);
    genesis
}

fn checksum(bytes: &[u8]) -> [u8; 2] {
    let sum = bytes.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16));
    sum.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Fr {
        field::parse_decimal(
            "18656147546666944484453899241916469544090258810192803949522794490493271005313",
        )
        .unwrap()
    }

    #[test]
    fn genesis_identifier_round_trips_through_a_signal() {
        let id = Identifier::from_genesis_state(0x02, 0x12, &state());
        let decoded = Identifier::from_field(&id.to_field()).unwrap();
        assert_eq!(decoded, id);
        assert!(decoded.is_genesis_of(&state()));
        assert!(!decoded.is_genesis_of(&Fr::from(42u64)));
    }

    #[test]
    fn corrupted_checksum_is_malformed() {
        let id = Identifier::from_genesis_state(0x02, 0x12, &state());
        let mut bytes = field::to_le_bytes(&id.to_field());
        bytes[5] ^= 0x01;
        let tampered = field::from_le_bytes(&bytes).unwrap();
        assert!(matches!(
            Identifier::from_field(&tampered),
            Err(VerifyError::MalformedToken(_))
        ));
    }

    #[test]
    fn network_label_comes_from_the_type_byte() {
        let id = Identifier::from_genesis_state(0x02, 0x12, &state());
        assert_eq!(id.network_label().unwrap(), "polygon:mumbai");
        assert!(id.did().starts_with("did:polygonid:polygon:mumbai:"));

        let unknown = Identifier::from_genesis_state(0x01, 0x7f, &state());
        assert!(matches!(
            unknown.network_label(),
            Err(VerifyError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn full_width_values_are_not_identifiers() {
        assert!(Identifier::from_field(&-Fr::from(1u64)).is_err());
    }
}
