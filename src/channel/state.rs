use std::sync::Arc;

use ethers::types::U256;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::account::Account;
use crate::crypto;
use crate::daemon::ChannelStateService;
use crate::error::{Error, Result};
use crate::ledger::{ChannelEventRecord, EscrowLedger};

/// One channel's funds, merged from the two sources of truth: the ledger
/// (initial_amount, expiration) and the daemon's state service (nonce,
/// signed_amount).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFunds {
    pub nonce: U256,
    pub signed_amount: U256,
    pub initial_amount: U256,
    pub expiration: U256,
}

impl ChannelFunds {
    /// Deposit not yet signed away.
    pub fn available_amount(&self) -> U256 {
        self.initial_amount.saturating_sub(self.signed_amount)
    }
}

/// An open payment channel plus its locally tracked state. The local state
/// starts zeroed and is only trusted after [`PaymentChannel::sync_state`].
pub struct PaymentChannel {
    record: ChannelEventRecord,
    account: Arc<Account>,
    ledger: Arc<dyn EscrowLedger>,
    state_service: Arc<dyn ChannelStateService>,
    funds: RwLock<ChannelFunds>,
}

impl PaymentChannel {
    pub fn new(
        record: ChannelEventRecord,
        account: Arc<Account>,
        ledger: Arc<dyn EscrowLedger>,
        state_service: Arc<dyn ChannelStateService>,
    ) -> Self {
        Self {
            record,
            account,
            ledger,
            state_service,
            funds: RwLock::new(ChannelFunds::default()),
        }
    }

    pub fn channel_id(&self) -> U256 {
        self.record.channel_id
    }

    pub fn record(&self) -> &ChannelEventRecord {
        &self.record
    }

    pub async fn funds(&self) -> ChannelFunds {
        *self.funds.read().await
    }

    /// Re-reads nonce and signed amount from the daemon and value and
    /// expiration from the ledger, then overwrites the local view. Any
    /// failure propagates and leaves the local state untouched; money is
    /// never moved on stale numbers.
    pub async fn sync_state(&self) -> Result<ChannelFunds> {
        let current_block = self.ledger.current_block_number().await?;
        let message = crypto::channel_state_message(self.record.channel_id);
        let signature = self.account.sign_claim(&message).await?;
        let remote = self
            .state_service
            .channel_state(self.record.channel_id, &signature, current_block)
            .await?;
        let on_chain = self.ledger.channel(self.record.channel_id).await?.ok_or_else(|| {
            Error::NoUsableChannel(format!(
                "channel {} from the event cache is not on the ledger",
                self.record.channel_id
            ))
        })?;

        let funds = ChannelFunds {
            nonce: remote.current_nonce,
            signed_amount: remote.current_signed_amount,
            initial_amount: on_chain.value,
            expiration: on_chain.expiration,
        };
        *self.funds.write().await = funds;
        debug!(
            channel_id = %self.record.channel_id,
            signed = %funds.signed_amount,
            available = %funds.available_amount(),
            expiration = %funds.expiration,
            "synchronized channel state"
        );
        Ok(funds)
    }

    /// `channelAddFunds`, topping the escrow balance up first when it cannot
    /// cover the amount.
    pub async fn add_funds(&self, amount: U256) -> Result<()> {
        self.ledger
            .ensure_escrow_balance(&self.account, amount)
            .await?;
        self.ledger
            .channel_add_funds(&self.account, self.record.channel_id, amount)
            .await?;
        let mut funds = self.funds.write().await;
        funds.initial_amount += amount;
        info!(channel_id = %self.record.channel_id, %amount, "added funds to channel");
        Ok(())
    }

    /// `channelExtend` to an absolute block number.
    pub async fn extend_expiration(&self, expiration: U256) -> Result<()> {
        self.ledger
            .channel_extend(&self.account, self.record.channel_id, expiration)
            .await?;
        self.funds.write().await.expiration = expiration;
        info!(channel_id = %self.record.channel_id, %expiration, "extended channel expiration");
        Ok(())
    }

    /// Extend and fund in one transaction, with the same escrow top-up rule
    /// as [`PaymentChannel::add_funds`].
    pub async fn extend_and_add_funds(&self, expiration: U256, amount: U256) -> Result<()> {
        self.ledger
            .ensure_escrow_balance(&self.account, amount)
            .await?;
        self.ledger
            .channel_extend_and_add_funds(&self.account, self.record.channel_id, expiration, amount)
            .await?;
        let mut funds = self.funds.write().await;
        funds.expiration = expiration;
        funds.initial_amount += amount;
        info!(channel_id = %self.record.channel_id, %expiration, %amount, "extended and funded channel");
        Ok(())
    }
}
