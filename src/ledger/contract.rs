use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::{abigen, EthEvent};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, TransactionReceipt, U256};
use tracing::debug;

use crate::account::Account;
use crate::config::ClientConfig;
use crate::error::{Error, Result};

use super::{ChannelEventRecord, EscrowLedger, GroupId, OnChainChannel};

abigen!(
    MultiPartyEscrow,
    r#"[
        event ChannelOpen(uint256 channelId, uint256 nonce, address indexed sender, address signer, address indexed recipient, bytes32 indexed groupId, uint256 amount, uint256 expiration)
        function balances(address account) view returns (uint256)
        function deposit(uint256 value) returns (bool)
        function openChannel(address signer, address recipient, bytes32 groupId, uint256 value, uint256 expiration) returns (bool)
        function depositAndOpenChannel(address signer, address recipient, bytes32 groupId, uint256 value, uint256 expiration) returns (bool)
        function channelAddFunds(uint256 channelId, uint256 amount) returns (bool)
        function channelExtend(uint256 channelId, uint256 newExpiration) returns (bool)
        function channelExtendAndAddFunds(uint256 channelId, uint256 newExpiration, uint256 amount)
        function channels(uint256 channelId) view returns (address sender, address signer, address recipient, bytes32 groupId, uint256 value, uint256 nonce, uint256 expiration)
    ]"#
);

abigen!(
    PaymentToken,
    r#"[
        function balanceOf(address owner) view returns (uint256)
        function allowance(address owner, address spender) view returns (uint256)
        function approve(address spender, uint256 value) returns (bool)
    ]"#
);

/// [`EscrowLedger`] backed by the deployed MultiPartyEscrow and its payment
/// token over JSON-RPC. Mutations go through [`Account::send_transaction`]
/// so nonce management and the receipt wait stay in one place.
pub struct MpeContract {
    escrow: MultiPartyEscrow<Provider<Http>>,
    token: PaymentToken<Provider<Http>>,
    provider: Arc<Provider<Http>>,
    address: Address,
    deployment_block: u64,
}

impl MpeContract {
    pub fn new(provider: Arc<Provider<Http>>, config: &ClientConfig) -> Self {
        Self {
            escrow: MultiPartyEscrow::new(config.mpe_contract_address, provider.clone()),
            token: PaymentToken::new(config.token_contract_address, provider.clone()),
            provider,
            address: config.mpe_contract_address,
            deployment_block: config.mpe_deployment_block,
        }
    }
}

fn contract_error<E: std::fmt::Display>(err: E) -> Error {
    Error::Contract(err.to_string())
}

#[async_trait]
impl EscrowLedger for MpeContract {
    async fn current_block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn escrow_balance(&self, address: Address) -> Result<U256> {
        self.escrow
            .balances(address)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn token_balance(&self, address: Address) -> Result<U256> {
        self.token
            .balance_of(address)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn token_allowance(&self, owner: Address) -> Result<U256> {
        self.token
            .allowance(owner, self.address)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn approve_transfer(
        &self,
        account: &Account,
        amount: U256,
    ) -> Result<TransactionReceipt> {
        let call = self.token.approve(self.address, amount);
        account.send_transaction(call.tx).await
    }

    async fn deposit(&self, account: &Account, amount: U256) -> Result<TransactionReceipt> {
        let call = self.escrow.deposit(amount);
        account.send_transaction(call.tx).await
    }

    async fn open_channel(
        &self,
        account: &Account,
        recipient: Address,
        group_id: GroupId,
        amount: U256,
        expiration: U256,
    ) -> Result<TransactionReceipt> {
        let call = self.escrow.open_channel(
            account.signer_address(),
            recipient,
            group_id,
            amount,
            expiration,
        );
        account.send_transaction(call.tx).await
    }

    async fn deposit_and_open_channel(
        &self,
        account: &Account,
        recipient: Address,
        group_id: GroupId,
        amount: U256,
        expiration: U256,
    ) -> Result<TransactionReceipt> {
        let call = self.escrow.deposit_and_open_channel(
            account.signer_address(),
            recipient,
            group_id,
            amount,
            expiration,
        );
        account.send_transaction(call.tx).await
    }

    async fn channel_add_funds(
        &self,
        account: &Account,
        channel_id: U256,
        amount: U256,
    ) -> Result<TransactionReceipt> {
        let call = self.escrow.channel_add_funds(channel_id, amount);
        account.send_transaction(call.tx).await
    }

    async fn channel_extend(
        &self,
        account: &Account,
        channel_id: U256,
        expiration: U256,
    ) -> Result<TransactionReceipt> {
        let call = self.escrow.channel_extend(channel_id, expiration);
        account.send_transaction(call.tx).await
    }

    async fn channel_extend_and_add_funds(
        &self,
        account: &Account,
        channel_id: U256,
        expiration: U256,
        amount: U256,
    ) -> Result<TransactionReceipt> {
        let call = self
            .escrow
            .channel_extend_and_add_funds(channel_id, expiration, amount);
        account.send_transaction(call.tx).await
    }

    async fn channel(&self, channel_id: U256) -> Result<Option<OnChainChannel>> {
        let (sender, signer, recipient, group_id, value, nonce, expiration) = self
            .escrow
            .channels(channel_id)
            .call()
            .await
            .map_err(contract_error)?;
        if sender == Address::zero() {
            return Ok(None);
        }
        Ok(Some(OnChainChannel {
            sender,
            signer,
            recipient,
            group_id,
            value,
            nonce,
            expiration,
        }))
    }

    async fn channel_open_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChannelEventRecord>> {
        let filter = Filter::new()
            .address(self.address)
            .topic0(ChannelOpenFilter::signature())
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        debug!(from_block, to_block, count = logs.len(), "scanned channel-open events");

        let mut records = Vec::with_capacity(logs.len());
        for log in logs {
            let raw = RawLog::from(log);
            let event = ChannelOpenFilter::decode_log(&raw).map_err(contract_error)?;
            records.push(ChannelEventRecord {
                channel_id: event.channel_id,
                sender: event.sender,
                signer: event.signer,
                recipient: event.recipient,
                group_id: event.group_id,
            });
        }
        Ok(records)
    }

    fn contract_address(&self) -> Address {
        self.address
    }

    fn deployment_block(&self) -> u64 {
        self.deployment_block
    }
}
