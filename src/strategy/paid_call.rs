use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::U256;

use crate::channel::PaymentChannel;
use crate::client::ServiceContext;
use crate::crypto;
use crate::error::Result;

use super::{
    select_channel, MetadataValue, PaymentMetadata, PaymentStrategy, CHANNEL_AMOUNT, CHANNEL_ID,
    CHANNEL_NONCE, CHANNEL_SIGNATURE, DEFAULT_BLOCK_OFFSET, DEFAULT_CALL_ALLOWANCE, PAYMENT_TYPE,
};

/// Pay-per-call escrow claims: every call signs the channel's cumulative
/// amount advanced by one call's price.
pub struct PaidCallStrategy {
    block_offset: u64,
    call_allowance: u64,
}

impl PaidCallStrategy {
    pub fn new(block_offset: u64, call_allowance: u64) -> Self {
        Self {
            block_offset,
            call_allowance,
        }
    }

    /// Claim metadata spending `ctx.price()` on a specific channel. The
    /// channel's local state must be fresh; [`select_channel`] callers get
    /// that for free, anyone else syncs first.
    pub async fn payment_metadata_for_channel(
        &self,
        ctx: &ServiceContext,
        channel: &PaymentChannel,
    ) -> Result<PaymentMetadata> {
        let funds = channel.funds().await;
        let amount = funds.signed_amount + ctx.price();
        let message = crypto::claim_message(
            ctx.mpe_address(),
            channel.channel_id(),
            funds.nonce,
            amount,
        );
        let signature = ctx.sign_claim(&message).await?;

        Ok(vec![
            (PAYMENT_TYPE, MetadataValue::Str("escrow".to_string())),
            (
                CHANNEL_ID,
                MetadataValue::Str(channel.channel_id().to_string()),
            ),
            (CHANNEL_NONCE, MetadataValue::Str(funds.nonce.to_string())),
            (CHANNEL_AMOUNT, MetadataValue::Str(amount.to_string())),
            (CHANNEL_SIGNATURE, MetadataValue::Bin(signature.to_vec())),
        ])
    }
}

impl Default for PaidCallStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_OFFSET, DEFAULT_CALL_ALLOWANCE)
    }
}

#[async_trait]
impl PaymentStrategy for PaidCallStrategy {
    async fn payment_metadata(&self, ctx: &ServiceContext) -> Result<PaymentMetadata> {
        let price = ctx.price();
        let channel = self.select_payment_channel(ctx, price).await?;
        self.payment_metadata_for_channel(ctx, &channel).await
    }
}

impl PaidCallStrategy {
    async fn select_payment_channel(
        &self,
        ctx: &ServiceContext,
        price: U256,
    ) -> Result<Arc<PaymentChannel>> {
        select_channel(
            ctx,
            price,
            price * U256::from(self.call_allowance),
            self.block_offset,
        )
        .await
    }
}
