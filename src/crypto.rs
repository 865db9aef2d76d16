//! Packed-message construction and signing. Every proof in the protocol is a
//! personal-style signature over the keccak digest of a solidity-packed
//! tuple; the builders here pin down the exact byte layouts.

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, U256};
use ethers::utils::{keccak256, to_checksum};

use crate::error::Result;

/// Prefix of the cumulative escrow claim a service provider redeems on-chain.
pub const CLAIM_MESSAGE_PREFIX: &str = "__MPE_claim_message";
/// Prefix of the free-call authorization tuple.
pub const FREE_CALL_PREFIX: &str = "__prefix_free_trial";

pub trait U256Ext {
    fn to_be_bytes_vec(&self) -> Vec<u8>;
}

impl U256Ext for U256 {
    fn to_be_bytes_vec(&self) -> Vec<u8> {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        bytes.to_vec()
    }
}

/// Big-endian bytes to U256. The daemon serializes uint256 values with or
/// without leading-zero padding.
pub fn u256_from_be(bytes: &[u8]) -> U256 {
    let bytes = if bytes.len() > 32 {
        &bytes[bytes.len() - 32..]
    } else {
        bytes
    };
    U256::from_big_endian(bytes)
}

/// Escrow claim over (prefix, escrow address, channel id, nonce, amount).
/// `amount` is cumulative: the total the recipient may withdraw, not the
/// increment of one call.
pub fn claim_message(mpe_address: Address, channel_id: U256, nonce: U256, amount: U256) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(CLAIM_MESSAGE_PREFIX.as_bytes());
    message.extend_from_slice(mpe_address.as_bytes());
    message.extend_from_slice(&channel_id.to_be_bytes_vec());
    message.extend_from_slice(&nonce.to_be_bytes_vec());
    message.extend_from_slice(&amount.to_be_bytes_vec());
    message
}

/// Free-call tuple. The address rides along as its checksummed string and
/// the group id as the base64 string from service metadata, matching what
/// the daemon reconstructs. Token requests sign the token-less form; calls
/// append the current token.
pub fn free_call_message(
    user_address: Address,
    org_id: &str,
    service_id: &str,
    group_id: &str,
    current_block: u64,
    token: Option<&[u8]>,
) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(FREE_CALL_PREFIX.as_bytes());
    message.extend_from_slice(to_checksum(&user_address, None).as_bytes());
    message.extend_from_slice(org_id.as_bytes());
    message.extend_from_slice(service_id.as_bytes());
    message.extend_from_slice(group_id.as_bytes());
    message.extend_from_slice(&U256::from(current_block).to_be_bytes_vec());
    if let Some(token) = token {
        message.extend_from_slice(token);
    }
    message
}

/// Message authorizing a channel-state query: just the packed channel id.
pub fn channel_state_message(channel_id: U256) -> Vec<u8> {
    channel_id.to_be_bytes_vec()
}

/// Countersignature material for a token request: the claim signature bytes
/// followed by the packed current block.
pub fn token_request_message(claim_signature: &Signature, current_block: u64) -> Vec<u8> {
    let mut message = claim_signature.to_vec();
    message.extend_from_slice(&U256::from(current_block).to_be_bytes_vec());
    message
}

/// Hashes the packed message with keccak and signs the 32-byte digest.
/// `sign_message` already applies the Ethereum signed-message prefix, so the
/// daemon recovers the signer from `prefix(keccak(message))`.
pub async fn sign_packed(wallet: &LocalWallet, message: &[u8]) -> Result<Signature> {
    let digest = keccak256(message);
    Ok(wallet.sign_message(digest).await?)
}
