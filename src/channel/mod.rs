//! Payment-channel plumbing: the persisted event index, channel discovery
//! and opening, and per-channel state synchronization.

pub mod cache;
pub mod provider;
pub mod state;

pub use cache::{ChannelEventCache, BLOCKS_PER_BATCH};
pub use provider::ChannelProvider;
pub use state::{ChannelFunds, PaymentChannel};
