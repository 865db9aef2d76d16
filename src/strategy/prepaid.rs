use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::U256;

use crate::channel::PaymentChannel;
use crate::client::ServiceContext;
use crate::concurrency::ConcurrencyTokenManager;
use crate::error::Result;

use super::{
    select_channel, MetadataValue, PaymentMetadata, PaymentStrategy, CHANNEL_ID, CHANNEL_NONCE,
    DEFAULT_BLOCK_OFFSET, DEFAULT_CALL_ALLOWANCE, PAYMENT_TYPE, PREPAID_AUTH_TOKEN,
};

/// Concurrent calls against one channel, authorized by a spending token
/// instead of a per-call claim signature. The channel is provisioned for a
/// whole batch of calls at once.
pub struct PrepaidStrategy {
    manager: ConcurrencyTokenManager,
    block_offset: u64,
    call_allowance: u64,
}

impl PrepaidStrategy {
    pub fn new(manager: ConcurrencyTokenManager) -> Self {
        Self {
            manager,
            block_offset: DEFAULT_BLOCK_OFFSET,
            call_allowance: DEFAULT_CALL_ALLOWANCE,
        }
    }

    pub fn manager(&self) -> &ConcurrencyTokenManager {
        &self.manager
    }

    /// Price of one full batch of concurrent calls.
    pub fn batch_price(&self, ctx: &ServiceContext) -> U256 {
        ctx.price() * U256::from(self.manager.concurrent_calls())
    }

    /// Admits one call: selects and provisions a channel for the batch
    /// price, then gets a spending token for it.
    pub async fn admit_call(
        &self,
        ctx: &ServiceContext,
    ) -> Result<(String, Arc<PaymentChannel>)> {
        let batch_price = self.batch_price(ctx);
        let channel = select_channel(
            ctx,
            batch_price,
            batch_price * U256::from(self.call_allowance),
            self.block_offset,
        )
        .await?;
        let token = self.manager.get_token(&channel, ctx.price()).await?;
        Ok((token, channel))
    }
}

#[async_trait]
impl PaymentStrategy for PrepaidStrategy {
    async fn payment_metadata(&self, ctx: &ServiceContext) -> Result<PaymentMetadata> {
        let (token, channel) = self.admit_call(ctx).await?;
        let funds = channel.funds().await;

        Ok(vec![
            (PAYMENT_TYPE, MetadataValue::Str("prepaid-call".to_string())),
            (
                CHANNEL_ID,
                MetadataValue::Str(channel.channel_id().to_string()),
            ),
            (CHANNEL_NONCE, MetadataValue::Str(funds.nonce.to_string())),
            (PREPAID_AUTH_TOKEN, MetadataValue::Bin(token.into_bytes())),
        ])
    }

    async fn concurrency_token_and_channel(
        &self,
        ctx: &ServiceContext,
    ) -> Result<(String, Arc<PaymentChannel>)> {
        self.admit_call(ctx).await
    }

    async fn record_successful_call(&self, ctx: &ServiceContext) {
        self.manager.record_successful_call(ctx.price()).await;
    }

    async fn record_failed_call(&self, ctx: &ServiceContext) {
        self.manager.record_failed_call(ctx.price()).await;
    }
}
