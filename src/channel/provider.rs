use std::sync::Arc;

use ethers::types::{Address, TransactionReceipt, U256};
use tracing::info;

use crate::account::Account;
use crate::daemon::ChannelStateService;
use crate::error::{Error, Result};
use crate::ledger::{EscrowLedger, GroupId};

use super::cache::ChannelEventCache;
use super::state::PaymentChannel;

/// Discovers existing channels through the event cache and opens new ones.
pub struct ChannelProvider {
    cache: ChannelEventCache,
    ledger: Arc<dyn EscrowLedger>,
    account: Arc<Account>,
    state_service: Arc<dyn ChannelStateService>,
}

impl ChannelProvider {
    pub fn new(
        cache: ChannelEventCache,
        ledger: Arc<dyn EscrowLedger>,
        account: Arc<Account>,
        state_service: Arc<dyn ChannelStateService>,
    ) -> Self {
        Self {
            cache,
            ledger,
            account,
            state_service,
        }
    }

    /// Channels this account previously opened for (recipient, group),
    /// after bringing the event cache up to date. Local state is zeroed
    /// until the caller syncs it.
    pub async fn past_open_channels(
        &self,
        recipient: Address,
        group_id: GroupId,
    ) -> Result<Vec<Arc<PaymentChannel>>> {
        self.cache.refresh(self.ledger.as_ref()).await?;
        let records = self
            .cache
            .channels_for(
                self.account.address(),
                self.account.signer_address(),
                recipient,
                group_id,
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|record| {
                Arc::new(PaymentChannel::new(
                    record,
                    self.account.clone(),
                    self.ledger.clone(),
                    self.state_service.clone(),
                ))
            })
            .collect())
    }

    /// `openChannel` against already-deposited escrow funds.
    pub async fn open_channel(
        &self,
        recipient: Address,
        group_id: GroupId,
        amount: U256,
        expiration: U256,
    ) -> Result<Arc<PaymentChannel>> {
        let receipt = self
            .ledger
            .open_channel(&self.account, recipient, group_id, amount, expiration)
            .await?;
        info!(%amount, %expiration, "opened payment channel");
        self.newly_opened(recipient, group_id, &receipt).await
    }

    /// `depositAndOpenChannel`: moves tokens into the escrow and opens the
    /// channel in one transaction. Fails before submitting anything when
    /// the wallet cannot cover the deposit.
    pub async fn deposit_and_open_channel(
        &self,
        recipient: Address,
        group_id: GroupId,
        amount: U256,
        expiration: U256,
    ) -> Result<Arc<PaymentChannel>> {
        let balance = self.ledger.token_balance(self.account.address()).await?;
        if amount > balance {
            return Err(Error::InsufficientFunds {
                required: amount,
                available: balance,
            });
        }
        self.ledger.ensure_allowance(&self.account, amount).await?;
        let receipt = self
            .ledger
            .deposit_and_open_channel(&self.account, recipient, group_id, amount, expiration)
            .await?;
        info!(%amount, %expiration, "deposited and opened payment channel");
        self.newly_opened(recipient, group_id, &receipt).await
    }

    /// The channel created by a just-mined open transaction: rescan and take
    /// the newest matching record.
    async fn newly_opened(
        &self,
        recipient: Address,
        group_id: GroupId,
        receipt: &TransactionReceipt,
    ) -> Result<Arc<PaymentChannel>> {
        let channels = self.past_open_channels(recipient, group_id).await?;
        channels.into_iter().last().ok_or_else(|| {
            Error::NoUsableChannel(format!(
                "open transaction {:?} mined but no channel event was found",
                receipt.transaction_hash
            ))
        })
    }
}
