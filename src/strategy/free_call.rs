use async_trait::async_trait;
use ethers::utils::to_checksum;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::ServiceContext;
use crate::crypto;
use crate::error::{Error, Result};

use super::{
    MetadataValue, PaymentMetadata, PaymentStrategy, CHANNEL_SIGNATURE, CURRENT_BLOCK_NUMBER,
    FREE_CALL_AUTH_TOKEN, FREE_CALL_USER_ADDRESS, PAYMENT_TYPE,
};

#[derive(Default)]
struct CachedToken {
    token: Option<Vec<u8>>,
    expiration_block: u64,
}

/// Pays with the service's free-call allowance. Holds the free-call token
/// across calls and re-fetches it when it expires.
#[derive(Default)]
pub struct FreeCallStrategy {
    cached: Mutex<CachedToken>,
}

impl FreeCallStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining free calls for this caller. Never fails: any error from
    /// the daemon is logged and reported as zero, so payment falls through
    /// to a paid mode instead of failing the call.
    pub async fn free_calls_available(&self, ctx: &ServiceContext) -> u64 {
        match self.query_available(ctx).await {
            Ok(count) => count,
            Err(err) => {
                warn!(%err, "free-call availability check failed; treating allowance as exhausted");
                0
            }
        }
    }

    async fn query_available(&self, ctx: &ServiceContext) -> Result<u64> {
        let current_block = ctx.current_block_number().await?;
        let mut cached = self.cached.lock().await;
        let token = self.ensure_token(ctx, &mut cached, current_block).await?;

        let group = ctx.group();
        let message = crypto::free_call_message(
            ctx.signer_address(),
            &group.org_id,
            &group.service_id,
            &group.group_id,
            current_block,
            Some(&token),
        );
        let signature = ctx.sign_claim(&message).await?;
        ctx.free_call_service()
            .free_calls_available(
                &to_checksum(&ctx.signer_address(), None),
                &token,
                &signature,
                current_block,
            )
            .await
    }

    async fn ensure_token(
        &self,
        ctx: &ServiceContext,
        cached: &mut CachedToken,
        current_block: u64,
    ) -> Result<Vec<u8>> {
        if let Some(token) = &cached.token {
            if current_block <= cached.expiration_block {
                return Ok(token.clone());
            }
        }

        let group = ctx.group();
        let message = crypto::free_call_message(
            ctx.signer_address(),
            &group.org_id,
            &group.service_id,
            &group.group_id,
            current_block,
            None,
        );
        let signature = ctx.sign_claim(&message).await?;
        let grant = ctx
            .free_call_service()
            .free_call_token(&to_checksum(&ctx.signer_address(), None), &signature, current_block)
            .await?;
        debug!(
            token = %hex::encode(&grant.token),
            expiration_block = grant.expiration_block,
            "fetched free-call token"
        );
        cached.token = Some(grant.token.clone());
        cached.expiration_block = grant.expiration_block;
        Ok(grant.token)
    }
}

#[async_trait]
impl PaymentStrategy for FreeCallStrategy {
    async fn payment_metadata(&self, ctx: &ServiceContext) -> Result<PaymentMetadata> {
        if self.free_calls_available(ctx).await == 0 {
            return Err(Error::FreeCallsExhausted {
                address: to_checksum(&ctx.signer_address(), None),
            });
        }

        let current_block = ctx.current_block_number().await?;
        let mut cached = self.cached.lock().await;
        let token = self.ensure_token(ctx, &mut cached, current_block).await?;

        let group = ctx.group();
        let message = crypto::free_call_message(
            ctx.signer_address(),
            &group.org_id,
            &group.service_id,
            &group.group_id,
            current_block,
            Some(&token),
        );
        let signature = ctx.sign_claim(&message).await?;

        Ok(vec![
            (PAYMENT_TYPE, MetadataValue::Str("free-call".to_string())),
            (FREE_CALL_AUTH_TOKEN, MetadataValue::Bin(token)),
            (
                FREE_CALL_USER_ADDRESS,
                MetadataValue::Str(to_checksum(&ctx.signer_address(), None)),
            ),
            (
                CURRENT_BLOCK_NUMBER,
                MetadataValue::Str(current_block.to_string()),
            ),
            (CHANNEL_SIGNATURE, MetadataValue::Bin(signature.to_vec())),
        ])
    }
}
