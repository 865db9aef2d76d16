use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature, TransactionReceipt, H256, U256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::crypto;
use crate::error::{Error, Result};

/// The paying identity: wraps the funding wallet, the (possibly distinct)
/// claim-signing wallet, and everything needed to push signed legacy
/// transactions through a JSON-RPC endpoint.
pub struct Account {
    provider: Arc<Provider<Http>>,
    wallet: LocalWallet,
    signer_wallet: LocalWallet,
    chain_id: u64,
    gas_limit: U256,
    transaction_timeout: Duration,
    last_nonce: Mutex<Option<U256>>,
}

impl Account {
    /// The chain id is taken from the config when present and asked of the
    /// endpoint otherwise, so offline construction is possible.
    pub async fn new(provider: Arc<Provider<Http>>, config: &ClientConfig) -> Result<Self> {
        let chain_id = match config.chain_id {
            Some(chain_id) => chain_id,
            None => provider.get_chainid().await?.low_u64(),
        };
        let wallet = parse_wallet(&config.private_key, chain_id)?;
        let signer_wallet = match &config.signer_private_key {
            Some(key) => parse_wallet(key, chain_id)?,
            None => wallet.clone(),
        };
        Ok(Self {
            provider,
            wallet,
            signer_wallet,
            chain_id,
            gas_limit: U256::from(config.gas_limit),
            transaction_timeout: config.transaction_timeout(),
            last_nonce: Mutex::new(None),
        })
    }

    /// Address funding ledger transactions.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Address the daemon recovers from claims and auth signatures.
    pub fn signer_address(&self) -> Address {
        self.signer_wallet.address()
    }

    /// Signs a packed protocol message with the claim-signing wallet.
    pub async fn sign_claim(&self, message: &[u8]) -> Result<Signature> {
        crypto::sign_packed(&self.signer_wallet, message).await
    }

    /// Fills in nonce, gas and chain id, signs, submits, and waits for the
    /// receipt. A reverted transaction or one that does not get mined within
    /// the configured timeout is an error.
    pub async fn send_transaction(&self, mut tx: TypedTransaction) -> Result<TransactionReceipt> {
        let nonce = self.next_nonce().await?;
        let gas_price = bump_gas_price(self.provider.get_gas_price().await?);
        tx.set_from(self.address());
        tx.set_nonce(nonce);
        tx.set_gas(self.gas_limit);
        tx.set_gas_price(gas_price);
        tx.set_chain_id(self.chain_id);

        let signature = self.wallet.sign_transaction(&tx).await?;
        let raw = tx.rlp_signed(&signature);
        let pending = self.provider.send_raw_transaction(raw).await?;
        let tx_hash: H256 = *pending;
        debug!(?tx_hash, %nonce, %gas_price, "submitted ledger transaction");

        let mined = match tokio::time::timeout(self.transaction_timeout, pending).await {
            Ok(mined) => mined?,
            Err(_) => {
                return Err(Error::TransactionTimeout {
                    tx_hash,
                    timeout_secs: self.transaction_timeout.as_secs(),
                })
            }
        };
        let receipt = mined.ok_or(Error::TransactionDropped { tx_hash })?;
        if receipt.status == Some(1u64.into()) {
            info!(?tx_hash, block = ?receipt.block_number, "ledger transaction mined");
            Ok(receipt)
        } else {
            Err(Error::TransactionFailed {
                receipt: Box::new(receipt),
            })
        }
    }

    /// Next transaction nonce: the chain's count, unless transactions this
    /// process submitted have not been counted yet, in which case one past
    /// the last nonce handed out. Serialized so concurrent submitters never
    /// share a nonce.
    async fn next_nonce(&self) -> Result<U256> {
        let mut last = self.last_nonce.lock().await;
        let chain = self
            .provider
            .get_transaction_count(self.address(), None)
            .await?;
        let nonce = next_nonce_value(*last, chain);
        *last = Some(nonce);
        Ok(nonce)
    }
}

fn parse_wallet(key: &str, chain_id: u64) -> Result<LocalWallet> {
    let wallet: LocalWallet = key.trim_start_matches("0x").parse()?;
    Ok(wallet.with_chain_id(chain_id))
}

fn next_nonce_value(last: Option<U256>, chain: U256) -> U256 {
    match last {
        Some(last) if last >= chain => last + 1,
        _ => chain,
    }
}

/// Over-bid the network gas price so transactions are not left hanging in a
/// rising market. The margin shrinks as the base price grows.
fn bump_gas_price(gas_price: U256) -> U256 {
    let gwei = U256::exp10(9);
    if gas_price <= gwei * 15u64 {
        gas_price + gas_price / 3u64
    } else if gas_price <= gwei * 50u64 {
        gas_price + gas_price / 5u64
    } else if gas_price <= gwei * 150u64 {
        gas_price + gwei * 7u64
    } else {
        gas_price + gas_price / 10u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gwei(n: u64) -> U256 {
        U256::exp10(9) * n
    }

    #[test]
    fn gas_price_margin_shrinks_with_price() {
        assert_eq!(bump_gas_price(gwei(9)), gwei(9) + gwei(3));
        assert_eq!(bump_gas_price(gwei(15)), gwei(15) + gwei(5));
        assert_eq!(bump_gas_price(gwei(40)), gwei(40) + gwei(8));
        assert_eq!(bump_gas_price(gwei(100)), gwei(107));
        assert_eq!(bump_gas_price(gwei(200)), gwei(220));
    }

    #[test]
    fn nonce_follows_chain_until_local_is_ahead() {
        // fresh process: chain wins
        assert_eq!(next_nonce_value(None, U256::from(5)), U256::from(5));
        // chain caught up with what we already used
        assert_eq!(
            next_nonce_value(Some(U256::from(4)), U256::from(5)),
            U256::from(5)
        );
        // chain has not seen our last transactions yet
        assert_eq!(
            next_nonce_value(Some(U256::from(7)), U256::from(5)),
            U256::from(8)
        );
    }

    #[tokio::test]
    async fn offline_construction_uses_configured_chain_id() {
        let provider = Arc::new(Provider::<Http>::try_from("http://localhost:8545").unwrap());
        let config = ClientConfig {
            private_key: "1234567890123456789012345678901234567890123456789012345678901234"
                .to_string(),
            chain_id: Some(11155111),
            ..ClientConfig::default()
        };
        let account = Account::new(provider, &config).await.unwrap();
        assert_eq!(account.address(), account.signer_address());
        assert_eq!(account.chain_id, 11155111);
    }

    #[tokio::test]
    async fn separate_signer_key_changes_signer_address_only() {
        let provider = Arc::new(Provider::<Http>::try_from("http://localhost:8545").unwrap());
        let config = ClientConfig {
            private_key: "1234567890123456789012345678901234567890123456789012345678901234"
                .to_string(),
            signer_private_key: Some(
                "0x2222222222222222222222222222222222222222222222222222222222222222".to_string(),
            ),
            chain_id: Some(1),
            ..ClientConfig::default()
        };
        let account = Account::new(provider, &config).await.unwrap();
        assert_ne!(account.address(), account.signer_address());
    }
}
