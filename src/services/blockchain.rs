//! State contract lookups over JSON-RPC using Alloy.

use alloy::{
    primitives::{Address, U256},
    providers::{ProviderBuilder, RootProvider},
    sol,
    transports::http::{Client, Http},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::state::{StateInfo, StateResolver};
use super::FetchError;
use crate::protocol::field::{self, Fr};
use crate::protocol::identity::Identifier;

sol! {
    #[sol(rpc)]
    interface IdentityState {
        struct StateInfo {
            uint256 id;
            uint256 state;
            uint256 replacedByState;
            uint256 createdAtTimestamp;
            uint256 replacedAtTimestamp;
            uint256 createdAtBlock;
            uint256 replacedAtBlock;
        }

        function getStateInfoByIdAndState(uint256 id, uint256 state) external view returns (StateInfo memory info);
    }
}

/// Resolves states against one deployed state contract.
pub struct EthStateResolver {
    provider: Arc<RootProvider<Http<Client>>>,
    contract_address: Address,
}

impl EthStateResolver {
    pub fn new(rpc_url: &str, contract_address: &str) -> Result<Self> {
        let contract_address: Address = contract_address
            .parse()
            .context("Invalid state contract address")?;

        let provider = ProviderBuilder::new().on_http(rpc_url.parse().context("Invalid RPC URL")?);

        Ok(Self {
            provider: Arc::new(provider),
            contract_address,
        })
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }
}

#[async_trait]
impl StateResolver for EthStateResolver {
    async fn state_info(&self, id: &Identifier, state: &Fr) -> Result<Option<StateInfo>, FetchError> {
        let contract = IdentityState::new(self.contract_address, &*self.provider);

        let info = match contract
            .getStateInfoByIdAndState(to_u256(&id.to_field()), to_u256(state))
            .call()
            .await
        {
            Ok(result) => result.info,
            // The contract reverts for states it has never seen.
            Err(e) if is_revert(&e.to_string()) => {
                tracing::debug!(identity = %id, "State not published: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(FetchError::Transient(e.to_string())),
        };

        Ok(Some(StateInfo {
            id: to_field(info.id)?,
            state: to_field(info.state)?,
            replaced_by_state: to_field(info.replacedByState)?,
            created_at_timestamp: info.createdAtTimestamp.try_into().unwrap_or(u64::MAX),
            replaced_at_timestamp: info.replacedAtTimestamp.try_into().unwrap_or(u64::MAX),
        }))
    }
}

fn is_revert(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("execution reverted") || message.contains("does not exist")
}

pub fn to_u256(value: &Fr) -> U256 {
    U256::from_le_slice(&field::to_le_bytes(value))
}

fn to_field(value: U256) -> Result<Fr, FetchError> {
    field::from_le_bytes(&value.to_le_bytes::<32>())
        .ok_or_else(|| FetchError::Permanent("contract returned a value outside the field".into()))
}
