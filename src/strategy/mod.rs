//! Payment strategies: who pays for a call, with what proof, and how the
//! channel carrying the payment is chosen and kept funded.

mod free_call;
mod paid_call;
mod prepaid;
mod training;

pub use free_call::FreeCallStrategy;
pub use paid_call::PaidCallStrategy;
pub use prepaid::PrepaidStrategy;
pub use training::TrainingStrategy;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::U256;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue, MetadataMap,
};
use tracing::debug;

use crate::channel::{ChannelFunds, PaymentChannel};
use crate::client::ServiceContext;
use crate::error::{Error, Result};

pub const PAYMENT_TYPE: &str = "snet-payment-type";
pub const CHANNEL_ID: &str = "snet-payment-channel-id";
pub const CHANNEL_NONCE: &str = "snet-payment-channel-nonce";
pub const CHANNEL_AMOUNT: &str = "snet-payment-channel-amount";
pub const CHANNEL_SIGNATURE: &str = "snet-payment-channel-signature-bin";
pub const PREPAID_AUTH_TOKEN: &str = "snet-prepaid-auth-token-bin";
pub const FREE_CALL_AUTH_TOKEN: &str = "snet-free-call-auth-token-bin";
pub const FREE_CALL_USER_ADDRESS: &str = "snet-free-call-user-address";
pub const CURRENT_BLOCK_NUMBER: &str = "snet-current-block-number";
pub const TRAIN_MODEL_ID: &str = "snet-train-model-id";

/// Channels opened or extended by the funding policy outlive the threshold
/// by this many blocks, so they are not immediately expiring again.
pub(crate) const DEFAULT_BLOCK_OFFSET: u64 = 240;
/// Calls' worth of funds added when a channel runs short.
pub(crate) const DEFAULT_CALL_ALLOWANCE: u64 = 1;

/// One proof-of-payment header. Keys ending in `-bin` carry raw bytes,
/// everything else printable ascii.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Str(String),
    Bin(Vec<u8>),
}

/// The headers a caller attaches to one outgoing service call.
pub type PaymentMetadata = Vec<(&'static str, MetadataValue)>;

/// Copies payment metadata onto a tonic request's metadata map.
pub fn attach_payment_metadata(map: &mut MetadataMap, metadata: &PaymentMetadata) -> Result<()> {
    for (key, value) in metadata {
        match value {
            MetadataValue::Str(value) => {
                let key: AsciiMetadataKey = key
                    .parse()
                    .map_err(|_| Error::Metadata(format!("invalid metadata key {key}")))?;
                let value: AsciiMetadataValue = value
                    .parse()
                    .map_err(|_| Error::Metadata(format!("unprintable metadata value for {key}")))?;
                map.insert(key, value);
            }
            MetadataValue::Bin(bytes) => {
                let key: BinaryMetadataKey = key
                    .parse()
                    .map_err(|_| Error::Metadata(format!("invalid binary metadata key {key}")))?;
                map.insert_bin(key, BinaryMetadataValue::from_bytes(bytes));
            }
        }
    }
    Ok(())
}

/// One way of paying for calls to a service.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    /// Proof-of-payment metadata for a single outgoing call.
    async fn payment_metadata(&self, ctx: &ServiceContext) -> Result<PaymentMetadata>;

    /// Spending token and the channel backing it, for callers driving their
    /// own batch of concurrent calls. Only strategies with a prepaid mode
    /// support this.
    async fn concurrency_token_and_channel(
        &self,
        ctx: &ServiceContext,
    ) -> Result<(String, Arc<PaymentChannel>)> {
        let _ = ctx;
        Err(Error::Config(
            "this payment strategy does not issue concurrency tokens".to_string(),
        ))
    }

    /// Reports a call admitted by this strategy as spent. No-op for
    /// strategies without budget accounting.
    async fn record_successful_call(&self, ctx: &ServiceContext) {
        let _ = ctx;
    }

    /// Reports an admitted call as failed, returning its budget. No-op for
    /// strategies without budget accounting.
    async fn record_failed_call(&self, ctx: &ServiceContext) {
        let _ = ctx;
    }
}

/// Which payment mode the default strategy will use for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyVariant {
    FreeCall,
    Prepaid,
    PaidCall,
}

/// Free calls while they last, then prepaid concurrent when enabled, else
/// pay-per-call.
pub fn select_variant(free_calls_remaining: u64, concurrency_enabled: bool) -> StrategyVariant {
    if free_calls_remaining > 0 {
        StrategyVariant::FreeCall
    } else if concurrency_enabled {
        StrategyVariant::Prepaid
    } else {
        StrategyVariant::PaidCall
    }
}

/// What the funding policy must do before a channel can carry a call
/// costing `price`. `expiration_floor` is the block the channel must stay
/// open past for the daemon to accept payments on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingAction {
    UseAsIs,
    Extend,
    AddFunds,
    ExtendAndAddFunds,
}

pub fn funding_action(funds: &ChannelFunds, price: U256, expiration_floor: u64) -> FundingAction {
    let sufficient = funds.available_amount() >= price;
    let usable = funds.expiration >= U256::from(expiration_floor);
    match (sufficient, usable) {
        (true, true) => FundingAction::UseAsIs,
        (true, false) => FundingAction::Extend,
        (false, true) => FundingAction::AddFunds,
        (false, false) => FundingAction::ExtendAndAddFunds,
    }
}

/// Shared channel selection: refresh what we know, take the first channel
/// for the group (opening one if none exists), then apply the funding
/// matrix so the chosen channel can actually carry the spend.
pub(crate) async fn select_channel(
    ctx: &ServiceContext,
    price: U256,
    extend_fund: U256,
    block_offset: u64,
) -> Result<Arc<PaymentChannel>> {
    ctx.load_open_channels().await?;
    ctx.update_channel_states().await?;
    let expiration_floor = ctx.default_channel_expiration().await?;

    let channel = match ctx.payment_channels().await.into_iter().next() {
        Some(channel) => channel,
        None => {
            if !ctx.allow_transactions() {
                return Err(Error::NoUsableChannel(
                    "no open channel and ledger transactions are disabled".to_string(),
                ));
            }
            let expiration = U256::from(expiration_floor + block_offset);
            let escrow_balance = ctx.escrow_balance().await?;
            let channel = if price > escrow_balance {
                ctx.deposit_and_open_channel(price, expiration).await?
            } else {
                ctx.open_channel(price, expiration).await?
            };
            channel.sync_state().await?;
            channel
        }
    };

    let funds = channel.funds().await;
    let action = funding_action(&funds, price, expiration_floor);
    if action != FundingAction::UseAsIs && !ctx.allow_transactions() {
        return Err(Error::NoUsableChannel(format!(
            "channel {} needs funding or extension but ledger transactions are disabled",
            channel.channel_id()
        )));
    }
    debug!(channel_id = %channel.channel_id(), ?action, "selected payment channel");
    match action {
        FundingAction::UseAsIs => {}
        FundingAction::Extend => {
            channel
                .extend_expiration(U256::from(expiration_floor + block_offset))
                .await?;
        }
        FundingAction::AddFunds => channel.add_funds(extend_fund).await?,
        FundingAction::ExtendAndAddFunds => {
            channel
                .extend_and_add_funds(U256::from(expiration_floor + block_offset), extend_fund)
                .await?;
        }
    }
    Ok(channel)
}

/// The composite strategy most callers want: rate-limited free calls while
/// they last, then the configured paid mode.
pub struct DefaultStrategy {
    free_call: FreeCallStrategy,
    prepaid: PrepaidStrategy,
    paid_call: PaidCallStrategy,
}

impl DefaultStrategy {
    pub fn new(
        free_call: FreeCallStrategy,
        prepaid: PrepaidStrategy,
        paid_call: PaidCallStrategy,
    ) -> Self {
        Self {
            free_call,
            prepaid,
            paid_call,
        }
    }
}

#[async_trait]
impl PaymentStrategy for DefaultStrategy {
    async fn payment_metadata(&self, ctx: &ServiceContext) -> Result<PaymentMetadata> {
        let free_remaining = self.free_call.free_calls_available(ctx).await;
        let variant = select_variant(free_remaining, ctx.concurrency_enabled());
        debug!(?variant, free_remaining, "selected payment mode");
        match variant {
            StrategyVariant::FreeCall => self.free_call.payment_metadata(ctx).await,
            StrategyVariant::Prepaid => self.prepaid.payment_metadata(ctx).await,
            StrategyVariant::PaidCall => self.paid_call.payment_metadata(ctx).await,
        }
    }

    async fn concurrency_token_and_channel(
        &self,
        ctx: &ServiceContext,
    ) -> Result<(String, Arc<PaymentChannel>)> {
        self.prepaid.concurrency_token_and_channel(ctx).await
    }

    async fn record_successful_call(&self, ctx: &ServiceContext) {
        if ctx.concurrency_enabled() {
            self.prepaid.record_successful_call(ctx).await;
        }
    }

    async fn record_failed_call(&self, ctx: &ServiceContext) {
        if ctx.concurrency_enabled() {
            self.prepaid.record_failed_call(ctx).await;
        }
    }
}
