use ethers::types::{TransactionReceipt, H256, U256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("ledger transaction {:?} reverted", .receipt.transaction_hash)]
    TransactionFailed { receipt: Box<TransactionReceipt> },

    #[error("ledger transaction {tx_hash:?} not mined within {timeout_secs}s; outcome unknown")]
    TransactionTimeout { tx_hash: H256, timeout_secs: u64 },

    #[error("ledger transaction {tx_hash:?} dropped from the mempool before being mined")]
    TransactionDropped { tx_hash: H256 },

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: U256, available: U256 },

    #[error("remote authority unavailable: {0}")]
    RemoteAuthority(String),

    #[error("no usable payment channel: {0}")]
    NoUsableChannel(String),

    #[error("no free calls remain for {address}")]
    FreeCallsExhausted { address: String },

    #[error("channel event cache unreadable: {0}")]
    CacheCorruption(String),

    #[error("contract call failed: {0}")]
    Contract(String),

    #[error("ethereum rpc error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("wallet error: {0}")]
    Wallet(#[from] ethers::signers::WalletError),

    #[error("invalid call metadata: {0}")]
    Metadata(String),

    #[error("{0} does not fit the daemon's wire range")]
    ValueTooLarge(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::RemoteAuthority(status.to_string())
    }
}
