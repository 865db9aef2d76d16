//! Client boundary to the service daemon's payment authorities: channel
//! state, spending tokens, free calls. Everything strategies need from the
//! daemon goes through the traits here so tests can stand in for it.

pub mod grpc;
pub use grpc::DaemonClient;

pub mod pb {
    tonic::include_proto!("escrow");
}

use async_trait::async_trait;
use ethers::types::{Signature, U256};

use crate::error::Result;

/// Channel state as the daemon reports it. The daemon, not the ledger, is
/// the authority for the signed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteChannelState {
    pub current_nonce: U256,
    pub current_signed_amount: U256,
}

/// A spending-token grant: the token plus the budget bookkeeping that came
/// with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub planned_amount: U256,
    pub used_amount: U256,
}

/// Free-call token and the block past which it stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeCallTokenGrant {
    pub token: Vec<u8>,
    pub expiration_block: u64,
}

/// Signed material for one token issuance. `signed_amount` is cumulative
/// and covered by `claim_signature`; `request_signature` countersigns the
/// claim together with `current_block`.
#[derive(Debug, Clone)]
pub struct TokenClaim {
    pub channel_id: U256,
    pub nonce: U256,
    pub signed_amount: U256,
    pub claim_signature: Signature,
    pub request_signature: Signature,
    pub current_block: u64,
}

#[async_trait]
pub trait ChannelStateService: Send + Sync {
    /// Authenticated channel-state query; `signature` covers the keccak
    /// digest of the packed channel id.
    async fn channel_state(
        &self,
        channel_id: U256,
        signature: &Signature,
        current_block: u64,
    ) -> Result<RemoteChannelState>;
}

#[async_trait]
pub trait PaymentTokenService: Send + Sync {
    async fn token_for_amount(&self, claim: &TokenClaim) -> Result<TokenGrant>;
}

#[async_trait]
pub trait FreeCallService: Send + Sync {
    /// Issues a free-call token for `address` (checksummed string form).
    async fn free_call_token(
        &self,
        address: &str,
        signature: &Signature,
        current_block: u64,
    ) -> Result<FreeCallTokenGrant>;

    async fn free_calls_available(
        &self,
        address: &str,
        token: &[u8],
        signature: &Signature,
        current_block: u64,
    ) -> Result<u64>;
}
