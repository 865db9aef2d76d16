//! Caller-facing context binding an account, the escrow ledger, and one
//! service group's daemon into a payment-capable client.

use std::sync::Arc;

use ethers::types::{Address, Signature, U256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::account::Account;
use crate::channel::{ChannelEventCache, ChannelProvider, PaymentChannel};
use crate::concurrency::ConcurrencyTokenManager;
use crate::config::{ClientConfig, ServiceGroup};
use crate::daemon::{ChannelStateService, DaemonClient, FreeCallService, PaymentTokenService};
use crate::error::{Error, Result};
use crate::ledger::{EscrowLedger, GroupId};
use crate::strategy::{
    DefaultStrategy, FreeCallStrategy, PaidCallStrategy, PaymentMetadata, PaymentStrategy,
    PrepaidStrategy,
};

/// One (account, ledger, service group) binding. Owns the channel list for
/// the group and fronts the strategy that pays for calls.
pub struct ServiceContext {
    group: ServiceGroup,
    group_id: GroupId,
    account: Arc<Account>,
    ledger: Arc<dyn EscrowLedger>,
    provider: ChannelProvider,
    free_call_service: Arc<dyn FreeCallService>,
    free_calls: FreeCallStrategy,
    strategy: Arc<dyn PaymentStrategy>,
    allow_transactions: bool,
    concurrency: bool,
    channels: RwLock<Vec<Arc<PaymentChannel>>>,
}

impl ServiceContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group: ServiceGroup,
        account: Arc<Account>,
        ledger: Arc<dyn EscrowLedger>,
        state_service: Arc<dyn ChannelStateService>,
        free_call_service: Arc<dyn FreeCallService>,
        strategy: Arc<dyn PaymentStrategy>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let group_id = group.group_id_bytes()?;
        let cache = ChannelEventCache::new(
            &config.cache_dir,
            ledger.contract_address(),
            ledger.deployment_block(),
        );
        let provider = ChannelProvider::new(cache, ledger.clone(), account.clone(), state_service);
        Ok(Self {
            group,
            group_id,
            account,
            ledger,
            provider,
            free_call_service,
            free_calls: FreeCallStrategy::new(),
            strategy,
            allow_transactions: config.allow_transactions,
            concurrency: config.concurrency,
            channels: RwLock::new(Vec::new()),
        })
    }

    /// [`ServiceContext::new`] with the composite default strategy wired
    /// from the same daemon services.
    #[allow(clippy::too_many_arguments)]
    pub fn with_default_strategy(
        group: ServiceGroup,
        account: Arc<Account>,
        ledger: Arc<dyn EscrowLedger>,
        state_service: Arc<dyn ChannelStateService>,
        token_service: Arc<dyn PaymentTokenService>,
        free_call_service: Arc<dyn FreeCallService>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let manager = ConcurrencyTokenManager::new(
            account.clone(),
            ledger.clone(),
            token_service,
            config.concurrent_calls,
        );
        let strategy = Arc::new(DefaultStrategy::new(
            FreeCallStrategy::new(),
            PrepaidStrategy::new(manager),
            PaidCallStrategy::default(),
        ));
        Self::new(
            group,
            account,
            ledger,
            state_service,
            free_call_service,
            strategy,
            config,
        )
    }

    /// Connects to the group's first daemon endpoint and wires the default
    /// strategy against it.
    pub fn connect(
        group: ServiceGroup,
        account: Arc<Account>,
        ledger: Arc<dyn EscrowLedger>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let endpoint = group.endpoints.first().ok_or_else(|| {
            Error::Config(format!("group {} has no daemon endpoints", group.group_name))
        })?;
        let daemon = Arc::new(DaemonClient::new(endpoint)?);
        Self::with_default_strategy(
            group,
            account,
            ledger,
            daemon.clone(),
            daemon.clone(),
            daemon,
            config,
        )
    }

    /// Proof-of-payment metadata for the next call, per the configured
    /// strategy.
    pub async fn payment_metadata(&self) -> Result<PaymentMetadata> {
        self.strategy.payment_metadata(self).await
    }

    /// Spending token and backing channel for callers running their own
    /// concurrent batch.
    pub async fn concurrency_token_and_channel(&self) -> Result<(String, Arc<PaymentChannel>)> {
        self.strategy.concurrency_token_and_channel(self).await
    }

    pub async fn record_successful_call(&self) {
        self.strategy.record_successful_call(self).await;
    }

    pub async fn record_failed_call(&self) {
        self.strategy.record_failed_call(self).await;
    }

    pub fn group(&self) -> &ServiceGroup {
        &self.group
    }

    pub fn price(&self) -> U256 {
        self.group.price_per_call
    }

    pub fn mpe_address(&self) -> Address {
        self.ledger.contract_address()
    }

    pub fn signer_address(&self) -> Address {
        self.account.signer_address()
    }

    pub fn allow_transactions(&self) -> bool {
        self.allow_transactions
    }

    pub fn concurrency_enabled(&self) -> bool {
        self.concurrency
    }

    pub fn free_call_service(&self) -> &dyn FreeCallService {
        self.free_call_service.as_ref()
    }

    pub async fn sign_claim(&self, message: &[u8]) -> Result<Signature> {
        self.account.sign_claim(message).await
    }

    pub async fn current_block_number(&self) -> Result<u64> {
        self.ledger.current_block_number().await
    }

    /// Escrow balance of the paying account.
    pub async fn escrow_balance(&self) -> Result<U256> {
        self.ledger.escrow_balance(self.account.address()).await
    }

    /// Deposit into the escrow, approving the token transfer when needed.
    pub async fn deposit_to_escrow(&self, amount: U256) -> Result<()> {
        self.ledger
            .deposit_with_approval(&self.account, amount)
            .await?;
        Ok(())
    }

    /// Remaining free calls; zero on any daemon failure. The free-call
    /// token backing the query is cached across calls.
    pub async fn free_calls_available(&self) -> u64 {
        self.free_calls.free_calls_available(self).await
    }

    /// Lowest expiration a channel may have and still be paid on now.
    pub async fn default_channel_expiration(&self) -> Result<u64> {
        let current_block = self.ledger.current_block_number().await?;
        Ok(current_block + self.group.payment_expiration_threshold)
    }

    /// Brings the known-channel list up to date from the event cache and
    /// returns it. Newly discovered channels carry zeroed local state until
    /// synced.
    pub async fn load_open_channels(&self) -> Result<Vec<Arc<PaymentChannel>>> {
        let discovered = self
            .provider
            .past_open_channels(self.group.payment_address, self.group_id)
            .await?;
        let mut channels = self.channels.write().await;
        for channel in discovered {
            if !channels.iter().any(|c| c.channel_id() == channel.channel_id()) {
                debug!(channel_id = %channel.channel_id(), "discovered payment channel");
                channels.push(channel);
            }
        }
        Ok(channels.clone())
    }

    /// Syncs every known channel against the daemon and the ledger.
    pub async fn update_channel_states(&self) -> Result<()> {
        let channels = self.channels.read().await.clone();
        for channel in channels {
            channel.sync_state().await?;
        }
        Ok(())
    }

    pub async fn payment_channels(&self) -> Vec<Arc<PaymentChannel>> {
        self.channels.read().await.clone()
    }

    /// Opens a channel for this group from already-deposited escrow funds.
    pub async fn open_channel(&self, amount: U256, expiration: U256) -> Result<Arc<PaymentChannel>> {
        let channel = self
            .provider
            .open_channel(self.group.payment_address, self.group_id, amount, expiration)
            .await?;
        self.register_channel(channel.clone()).await;
        Ok(channel)
    }

    /// Deposits and opens in one transaction.
    pub async fn deposit_and_open_channel(
        &self,
        amount: U256,
        expiration: U256,
    ) -> Result<Arc<PaymentChannel>> {
        let channel = self
            .provider
            .deposit_and_open_channel(self.group.payment_address, self.group_id, amount, expiration)
            .await?;
        self.register_channel(channel.clone()).await;
        Ok(channel)
    }

    async fn register_channel(&self, channel: Arc<PaymentChannel>) {
        let mut channels = self.channels.write().await;
        if !channels.iter().any(|c| c.channel_id() == channel.channel_id()) {
            channels.push(channel);
        }
    }
}
