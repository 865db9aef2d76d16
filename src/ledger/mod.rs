pub mod contract;
pub use contract::MpeContract;

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, U256};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::error::{Error, Result};

/// 32-byte service-group identifier, as recorded on-chain.
pub type GroupId = [u8; 32];

/// Channel fields held by the escrow contract's own storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnChainChannel {
    pub sender: Address,
    pub signer: Address,
    pub recipient: Address,
    pub group_id: GroupId,
    pub value: U256,
    pub nonce: U256,
    pub expiration: U256,
}

/// Immutable projection of one `ChannelOpen` log; this is what the event
/// cache persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEventRecord {
    pub channel_id: U256,
    pub sender: Address,
    pub signer: Address,
    pub recipient: Address,
    pub group_id: GroupId,
}

/// Everything the client does against the MultiPartyEscrow contract and its
/// payment token. [`MpeContract`] talks to a real chain; tests substitute an
/// in-memory ledger.
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    async fn current_block_number(&self) -> Result<u64>;

    /// Balance already deposited into the escrow for `address`.
    async fn escrow_balance(&self, address: Address) -> Result<U256>;

    /// Payment-token balance of `address`, not yet deposited.
    async fn token_balance(&self, address: Address) -> Result<U256>;

    /// Amount the escrow contract may currently pull from `owner`'s tokens.
    async fn token_allowance(&self, owner: Address) -> Result<U256>;

    async fn approve_transfer(&self, account: &Account, amount: U256)
        -> Result<TransactionReceipt>;

    async fn deposit(&self, account: &Account, amount: U256) -> Result<TransactionReceipt>;

    async fn open_channel(
        &self,
        account: &Account,
        recipient: Address,
        group_id: GroupId,
        amount: U256,
        expiration: U256,
    ) -> Result<TransactionReceipt>;

    async fn deposit_and_open_channel(
        &self,
        account: &Account,
        recipient: Address,
        group_id: GroupId,
        amount: U256,
        expiration: U256,
    ) -> Result<TransactionReceipt>;

    async fn channel_add_funds(
        &self,
        account: &Account,
        channel_id: U256,
        amount: U256,
    ) -> Result<TransactionReceipt>;

    async fn channel_extend(
        &self,
        account: &Account,
        channel_id: U256,
        expiration: U256,
    ) -> Result<TransactionReceipt>;

    async fn channel_extend_and_add_funds(
        &self,
        account: &Account,
        channel_id: U256,
        expiration: U256,
        amount: U256,
    ) -> Result<TransactionReceipt>;

    /// On-chain channel record; `None` when the id was never assigned.
    async fn channel(&self, channel_id: U256) -> Result<Option<OnChainChannel>>;

    /// Decoded `ChannelOpen` events in `[from_block, to_block]`, inclusive.
    async fn channel_open_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChannelEventRecord>>;

    fn contract_address(&self) -> Address;

    /// Block the escrow contract was deployed at; event scans never start
    /// earlier.
    fn deployment_block(&self) -> u64;

    /// Approve the escrow to pull `amount` of tokens when the standing
    /// allowance does not already cover it.
    async fn ensure_allowance(&self, account: &Account, amount: U256) -> Result<()> {
        let approved = self.token_allowance(account.address()).await?;
        if amount > approved {
            self.approve_transfer(account, amount).await?;
        }
        Ok(())
    }

    /// Deposit `amount` into the escrow. The token balance is checked first
    /// so an underfunded wallet fails here instead of burning gas on a
    /// reverting transfer.
    async fn deposit_with_approval(
        &self,
        account: &Account,
        amount: U256,
    ) -> Result<TransactionReceipt> {
        let balance = self.token_balance(account.address()).await?;
        if amount > balance {
            return Err(Error::InsufficientFunds {
                required: amount,
                available: balance,
            });
        }
        self.ensure_allowance(account, amount).await?;
        self.deposit(account, amount).await
    }

    /// Top the escrow balance up to at least `required`, depositing only the
    /// shortfall.
    async fn ensure_escrow_balance(&self, account: &Account, required: U256) -> Result<()> {
        let balance = self.escrow_balance(account.address()).await?;
        if required > balance {
            self.deposit_with_approval(account, required - balance).await?;
        }
        Ok(())
    }
}
