use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::GroupId;

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".snet/cache/mpe")
}

fn default_gas_limit() -> u64 {
    300_000
}

fn default_transaction_timeout_secs() -> u64 {
    500
}

fn default_concurrent_calls() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Client-wide settings. Everything that was once hardwired (cache location,
/// gas, timeouts) lives here so deployments can override it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Ethereum JSON-RPC endpoint.
    pub eth_rpc_endpoint: String,
    /// Hex private key (with or without `0x`) paying for ledger transactions.
    pub private_key: String,
    /// Separate signing key for claims and daemon authentication; defaults
    /// to `private_key`.
    #[serde(default)]
    pub signer_private_key: Option<String>,
    /// Deployed MultiPartyEscrow contract.
    pub mpe_contract_address: Address,
    /// Deployed payment token (ERC20) contract.
    pub token_contract_address: Address,
    /// Block the escrow contract was deployed at; event scans never start
    /// earlier.
    #[serde(default)]
    pub mpe_deployment_block: u64,
    /// Chain id used in transaction signatures; fetched from the RPC
    /// endpoint when unset.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Directory holding the channel event cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Gas limit attached to escrow transactions.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Seconds to wait for a receipt before reporting the outcome unknown.
    #[serde(default = "default_transaction_timeout_secs")]
    pub transaction_timeout_secs: u64,
    /// Whether strategies may submit ledger transactions (open, extend,
    /// fund) on the caller's behalf.
    #[serde(default = "default_true")]
    pub allow_transactions: bool,
    /// Whether the default strategy may pay with prepaid concurrent tokens.
    #[serde(default = "default_true")]
    pub concurrency: bool,
    /// Concurrent calls a prepaid token should budget for.
    #[serde(default = "default_concurrent_calls")]
    pub concurrent_calls: u32,
}

impl ClientConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            eth_rpc_endpoint: String::new(),
            private_key: String::new(),
            signer_private_key: None,
            mpe_contract_address: Address::zero(),
            token_contract_address: Address::zero(),
            mpe_deployment_block: 0,
            chain_id: None,
            cache_dir: default_cache_dir(),
            gas_limit: default_gas_limit(),
            transaction_timeout_secs: default_transaction_timeout_secs(),
            allow_transactions: true,
            concurrency: true,
            concurrent_calls: default_concurrent_calls(),
        }
    }
}

/// Resolved identity and payment parameters of one (organization, service,
/// payment group). Discovery against the on-chain registry and the metadata
/// store happens outside this crate; callers hand over the resolved values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub org_id: String,
    pub service_id: String,
    pub group_name: String,
    /// Group id exactly as service metadata spells it (base64 of 32 bytes).
    /// This string form participates in free-call signatures.
    pub group_id: String,
    /// Address the service provider collects channel claims with.
    pub payment_address: Address,
    /// Minimum blocks a channel must stay open beyond the current block for
    /// the daemon to accept payments on it.
    pub payment_expiration_threshold: u64,
    /// Price of one call, in the token's smallest unit.
    pub price_per_call: U256,
    /// Daemon endpoints serving this group, in preference order.
    pub endpoints: Vec<String>,
}

impl ServiceGroup {
    /// On-chain form of the group id.
    pub fn group_id_bytes(&self) -> Result<GroupId> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&self.group_id)
            .map_err(|err| {
                Error::Config(format!("group id {:?} is not valid base64: {err}", self.group_id))
            })?;
        GroupId::try_from(decoded.as_slice()).map_err(|_| {
            Error::Config(format!(
                "group id {:?} decodes to {} bytes, expected 32",
                self.group_id,
                decoded.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_fills_defaults() {
        let json = r#"{
            "eth_rpc_endpoint": "http://localhost:8545",
            "private_key": "1234567890123456789012345678901234567890123456789012345678901234",
            "mpe_contract_address": "0x5c7a4290f6f8ff64c69eeffdfafc8644a4ec3a4e",
            "token_contract_address": "0x5b1d5a43185ecd1bf8cbcba44aa9ff4b4b5e481f"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.gas_limit, 300_000);
        assert_eq!(config.transaction_timeout(), Duration::from_secs(500));
        assert_eq!(config.cache_dir, PathBuf::from(".snet/cache/mpe"));
        assert!(config.allow_transactions);
        assert!(config.concurrency);
        assert_eq!(config.concurrent_calls, 1);
        assert_eq!(config.chain_id, None);
    }

    #[test]
    fn group_id_decodes_to_32_bytes() {
        let group = ServiceGroup {
            org_id: "org".to_string(),
            service_id: "service".to_string(),
            group_name: "default_group".to_string(),
            group_id: base64::engine::general_purpose::STANDARD.encode([7u8; 32]),
            payment_address: Address::zero(),
            payment_expiration_threshold: 100,
            price_per_call: U256::from(1000),
            endpoints: vec!["http://localhost:7000".to_string()],
        };
        assert_eq!(group.group_id_bytes().unwrap(), [7u8; 32]);
    }

    #[test]
    fn group_id_of_wrong_length_is_rejected() {
        let group = ServiceGroup {
            org_id: "org".to_string(),
            service_id: "service".to_string(),
            group_name: "default_group".to_string(),
            group_id: base64::engine::general_purpose::STANDARD.encode([7u8; 8]),
            payment_address: Address::zero(),
            payment_expiration_threshold: 100,
            price_per_call: U256::from(1000),
            endpoints: vec![],
        };
        assert!(group.group_id_bytes().is_err());
    }
}
