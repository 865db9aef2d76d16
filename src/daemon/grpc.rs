use async_trait::async_trait;
use ethers::types::{Signature, U256};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::crypto::{u256_from_be, U256Ext};
use crate::error::{Error, Result};

use super::pb;
use super::pb::free_call_state_service_client::FreeCallStateServiceClient;
use super::pb::payment_channel_state_service_client::PaymentChannelStateServiceClient;
use super::pb::token_service_client::TokenServiceClient;
use super::{
    ChannelStateService, FreeCallService, FreeCallTokenGrant, PaymentTokenService,
    RemoteChannelState, TokenClaim, TokenGrant,
};

/// One lazily connected gRPC channel shared by the three daemon services.
/// Cloning is cheap; every call site grabs its own service client off the
/// shared channel.
#[derive(Clone)]
pub struct DaemonClient {
    channel: Channel,
}

impl DaemonClient {
    /// `http` endpoints speak plaintext, `https` endpoints TLS with the
    /// platform's trust roots; anything else is rejected. The connection
    /// itself is deferred to the first call.
    pub fn new(endpoint: &str) -> Result<Self> {
        let builder = Endpoint::from_shared(endpoint.to_string())
            .map_err(|err| Error::Config(format!("invalid daemon endpoint {endpoint}: {err}")))?;
        let builder = if endpoint.starts_with("https://") {
            builder
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|err| {
                    Error::Config(format!("tls setup failed for {endpoint}: {err}"))
                })?
        } else if endpoint.starts_with("http://") {
            builder
        } else {
            return Err(Error::Config(format!(
                "daemon endpoint {endpoint} must be http or https"
            )));
        };
        Ok(Self {
            channel: builder.connect_lazy(),
        })
    }
}

/// The daemon's token RPC carries uint64, not uint256.
fn wire_u64(value: U256, field: &'static str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(Error::ValueTooLarge(field));
    }
    Ok(value.low_u64())
}

#[async_trait]
impl ChannelStateService for DaemonClient {
    async fn channel_state(
        &self,
        channel_id: U256,
        signature: &Signature,
        current_block: u64,
    ) -> Result<RemoteChannelState> {
        let mut client = PaymentChannelStateServiceClient::new(self.channel.clone());
        let request = pb::ChannelStateRequest {
            channel_id: channel_id.to_be_bytes_vec(),
            signature: signature.to_vec(),
            current_block,
        };
        let reply = client.get_channel_state(request).await?.into_inner();
        let state = RemoteChannelState {
            current_nonce: u256_from_be(&reply.current_nonce),
            current_signed_amount: u256_from_be(&reply.current_signed_amount),
        };
        debug!(%channel_id, nonce = %state.current_nonce, signed = %state.current_signed_amount, "fetched channel state");
        Ok(state)
    }
}

#[async_trait]
impl PaymentTokenService for DaemonClient {
    async fn token_for_amount(&self, claim: &TokenClaim) -> Result<TokenGrant> {
        let mut client = TokenServiceClient::new(self.channel.clone());
        let request = pb::TokenRequest {
            channel_id: wire_u64(claim.channel_id, "channel id")?,
            current_nonce: wire_u64(claim.nonce, "channel nonce")?,
            signed_amount: wire_u64(claim.signed_amount, "signed amount")?,
            signature: claim.request_signature.to_vec(),
            current_block: claim.current_block,
            claim_signature: claim.claim_signature.to_vec(),
        };
        let reply = client.get_token(request).await?.into_inner();
        Ok(TokenGrant {
            token: reply.token,
            planned_amount: U256::from(reply.planned_amount),
            used_amount: U256::from(reply.used_amount),
        })
    }
}

#[async_trait]
impl FreeCallService for DaemonClient {
    async fn free_call_token(
        &self,
        address: &str,
        signature: &Signature,
        current_block: u64,
    ) -> Result<FreeCallTokenGrant> {
        let mut client = FreeCallStateServiceClient::new(self.channel.clone());
        let request = pb::GetFreeCallTokenRequest {
            address: address.to_string(),
            signature: signature.to_vec(),
            current_block,
        };
        let reply = client.get_free_call_token(request).await?.into_inner();
        Ok(FreeCallTokenGrant {
            token: reply.token,
            expiration_block: reply.token_expiration_block,
        })
    }

    async fn free_calls_available(
        &self,
        address: &str,
        token: &[u8],
        signature: &Signature,
        current_block: u64,
    ) -> Result<u64> {
        let mut client = FreeCallStateServiceClient::new(self.channel.clone());
        let request = pb::FreeCallStateRequest {
            address: address.to_string(),
            free_call_token: token.to_vec(),
            signature: signature.to_vec(),
            current_block,
        };
        let reply = client.get_free_calls_available(request).await?.into_inner();
        Ok(reply.free_calls_available)
    }
}
