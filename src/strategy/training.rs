use async_trait::async_trait;
use ethers::types::U256;
use tokio::sync::Mutex;

use crate::client::ServiceContext;
use crate::crypto;
use crate::error::{Error, Result};

use super::{
    select_channel, MetadataValue, PaymentMetadata, PaymentStrategy, CHANNEL_AMOUNT, CHANNEL_ID,
    CHANNEL_NONCE, CHANNEL_SIGNATURE, DEFAULT_BLOCK_OFFSET, DEFAULT_CALL_ALLOWANCE, PAYMENT_TYPE,
    TRAIN_MODEL_ID,
};

/// Escrow claims for model-training calls. Training prices come from the
/// training workflow per method and model, not from group metadata, so the
/// caller sets the price and the model id before each call.
pub struct TrainingStrategy {
    price: Mutex<Option<U256>>,
    model_id: Mutex<Option<String>>,
    block_offset: u64,
    call_allowance: u64,
}

impl TrainingStrategy {
    pub fn new() -> Self {
        Self {
            price: Mutex::new(None),
            model_id: Mutex::new(None),
            block_offset: DEFAULT_BLOCK_OFFSET,
            call_allowance: DEFAULT_CALL_ALLOWANCE,
        }
    }

    pub async fn set_price(&self, price: U256) {
        *self.price.lock().await = Some(price);
    }

    pub async fn set_model_id(&self, model_id: impl Into<String> + Send) {
        *self.model_id.lock().await = Some(model_id.into());
    }
}

impl Default for TrainingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentStrategy for TrainingStrategy {
    async fn payment_metadata(&self, ctx: &ServiceContext) -> Result<PaymentMetadata> {
        let price = (*self.price.lock().await)
            .ok_or_else(|| Error::Config("training call price is not set".to_string()))?;
        let model_id = self
            .model_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Config("training model id is not set".to_string()))?;

        let channel = select_channel(
            ctx,
            price,
            price * U256::from(self.call_allowance),
            self.block_offset,
        )
        .await?;
        let funds = channel.funds().await;
        let amount = funds.signed_amount + price;
        let message = crypto::claim_message(
            ctx.mpe_address(),
            channel.channel_id(),
            funds.nonce,
            amount,
        );
        let signature = ctx.sign_claim(&message).await?;

        Ok(vec![
            (PAYMENT_TYPE, MetadataValue::Str("train-call".to_string())),
            (
                CHANNEL_ID,
                MetadataValue::Str(channel.channel_id().to_string()),
            ),
            (CHANNEL_NONCE, MetadataValue::Str(funds.nonce.to_string())),
            (CHANNEL_AMOUNT, MetadataValue::Str(amount.to_string())),
            (CHANNEL_SIGNATURE, MetadataValue::Bin(signature.to_vec())),
            (TRAIN_MODEL_ID, MetadataValue::Str(model_id)),
        ])
    }
}
