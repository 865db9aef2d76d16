//! Client for calling escrow-metered services: manages payment channels
//! on the MultiPartyEscrow ledger, caches channel-open events, and builds
//! the signed proof-of-payment metadata each call carries.

pub mod account;
pub mod channel;
pub mod client;
pub mod concurrency;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod ledger;
pub mod strategy;

pub use account::Account;
pub use client::ServiceContext;
pub use config::{ClientConfig, ServiceGroup};
pub use error::{Error, Result};
