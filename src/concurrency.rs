//! Admission control for prepaid concurrent calls. One daemon-issued token
//! authorizes a budget of spend on a channel; the manager hands the token to
//! callers while budget remains and renews it when exhausted.

use std::sync::Arc;

use ethers::types::U256;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::account::Account;
use crate::channel::{ChannelFunds, PaymentChannel};
use crate::crypto;
use crate::daemon::{PaymentTokenService, TokenClaim, TokenGrant};
use crate::error::{Error, Result};
use crate::ledger::EscrowLedger;

/// Snapshot of the manager's budget accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub planned: U256,
    pub used: U256,
    pub reserved: U256,
}

#[derive(Default)]
struct TokenState {
    token: Option<String>,
    planned_amount: U256,
    used_amount: U256,
    reserved_amount: U256,
}

impl TokenState {
    fn fits(&self, price: U256) -> bool {
        self.used_amount + self.reserved_amount + price <= self.planned_amount
    }
}

/// Tracks one spending token per service group. Handing out the token
/// reserves one call's price until the caller reports the outcome, so
/// concurrent callers can never admit more spend than the token's planned
/// amount, whatever the interleaving.
///
/// The manager limits budget, not connections: `concurrent_calls` only sizes
/// the batch requested on each renewal. Callers wanting a hard cap on
/// in-flight calls enforce it themselves.
pub struct ConcurrencyTokenManager {
    account: Arc<Account>,
    ledger: Arc<dyn EscrowLedger>,
    token_service: Arc<dyn PaymentTokenService>,
    concurrent_calls: u32,
    state: Mutex<TokenState>,
}

impl ConcurrencyTokenManager {
    pub fn new(
        account: Arc<Account>,
        ledger: Arc<dyn EscrowLedger>,
        token_service: Arc<dyn PaymentTokenService>,
        concurrent_calls: u32,
    ) -> Self {
        Self {
            account,
            ledger,
            token_service,
            concurrent_calls: concurrent_calls.max(1),
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Batch size the budget is provisioned for.
    pub fn concurrent_calls(&self) -> u32 {
        self.concurrent_calls
    }

    pub async fn budget(&self) -> TokenBudget {
        let state = self.state.lock().await;
        TokenBudget {
            planned: state.planned_amount,
            used: state.used_amount,
            reserved: state.reserved_amount,
        }
    }

    /// Admits one call costing `price_per_call` and returns the token to
    /// attach to it. Reuses the cached token while its budget holds; on the
    /// first acquisition tries to adopt a token the daemon already has
    /// outstanding for this channel; otherwise signs a fresh claim for the
    /// signed amount plus one batch and exchanges it for a new token.
    pub async fn get_token(
        &self,
        channel: &PaymentChannel,
        price_per_call: U256,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = &state.token {
            if state.fits(price_per_call) {
                let token = token.clone();
                state.reserved_amount += price_per_call;
                return Ok(token);
            }
        }

        // About to sign for new money, so work from fresh numbers.
        let funds = channel.sync_state().await?;
        let batch_price = price_per_call * U256::from(self.concurrent_calls);

        if state.token.is_none() && !funds.signed_amount.is_zero() {
            // A previous process may have left a token behind. Asking for a
            // token at exactly the already-signed amount signs nothing new.
            // The grant is only worth adopting while it still covers a call.
            match self.request_token(channel, &funds, funds.signed_amount).await {
                Ok(grant) if grant.used_amount + price_per_call <= grant.planned_amount => {
                    debug!(channel_id = %channel.channel_id(), token = %grant.token, "adopted outstanding spending token");
                    return admit(&mut state, grant, price_per_call);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "outstanding-token check failed; requesting a fresh token");
                }
            }
        }

        let amount = funds.signed_amount + batch_price;
        let grant = self.request_token(channel, &funds, amount).await?;
        debug!(channel_id = %channel.channel_id(), token = %grant.token, planned = %grant.planned_amount, "issued spending token");
        admit(&mut state, grant, price_per_call)
    }

    /// Converts one reservation into recorded spend. Callers pair this (or
    /// [`ConcurrencyTokenManager::record_failed_call`]) with every admitted
    /// call; the pairing is what keeps used plus reserved within plan.
    pub async fn record_successful_call(&self, price_per_call: U256) {
        let mut state = self.state.lock().await;
        state.reserved_amount = state.reserved_amount.saturating_sub(price_per_call);
        state.used_amount += price_per_call;
    }

    /// Releases one reservation without spending it.
    pub async fn record_failed_call(&self, price_per_call: U256) {
        let mut state = self.state.lock().await;
        state.reserved_amount = state.reserved_amount.saturating_sub(price_per_call);
    }

    async fn request_token(
        &self,
        channel: &PaymentChannel,
        funds: &ChannelFunds,
        amount: U256,
    ) -> Result<TokenGrant> {
        let current_block = self.ledger.current_block_number().await?;
        let claim = crypto::claim_message(
            self.ledger.contract_address(),
            channel.channel_id(),
            funds.nonce,
            amount,
        );
        let claim_signature = self.account.sign_claim(&claim).await?;
        let request = crypto::token_request_message(&claim_signature, current_block);
        let request_signature = self.account.sign_claim(&request).await?;
        self.token_service
            .token_for_amount(&TokenClaim {
                channel_id: channel.channel_id(),
                nonce: funds.nonce,
                signed_amount: amount,
                claim_signature,
                request_signature,
                current_block,
            })
            .await
    }
}

/// Installs a grant and reserves the admitted call against it. Reservations
/// of calls still in flight carry over; they may double-count spend the
/// daemon has already folded into `used_amount`, which errs on the side of
/// renewing early rather than overspending.
fn admit(state: &mut TokenState, grant: TokenGrant, price_per_call: U256) -> Result<String> {
    let token = grant.token.clone();
    state.token = Some(grant.token);
    state.planned_amount = grant.planned_amount;
    state.used_amount = grant.used_amount;
    if !state.fits(price_per_call) {
        state.token = None;
        return Err(Error::RemoteAuthority(format!(
            "spending token budget exhausted on issue: planned {}, used {}, reserved {}",
            state.planned_amount, state.used_amount, state.reserved_amount
        )));
    }
    state.reserved_amount += price_per_call;
    Ok(token)
}
