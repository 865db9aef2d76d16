//! File-backed index of `ChannelOpen` events. Scanning logs from the
//! deployment block on every start is too slow, so the scan position and the
//! decoded records are persisted and only new blocks are read.

use std::path::{Path, PathBuf};

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ledger::{ChannelEventRecord, EscrowLedger, GroupId};

/// Blocks covered by a single `eth_getLogs` request.
pub const BLOCKS_PER_BATCH: u64 = 5000;

/// Bumped when the on-disk schema changes incompatibly; older files are
/// discarded and rebuilt.
const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheFile {
    pub(crate) version: u32,
    pub(crate) last_read_block: u64,
    pub(crate) channels: Vec<ChannelEventRecord>,
}

/// Event index for one escrow contract. The file lives under a directory
/// named after the contract address, so pointing the client at a different
/// deployment never mixes events.
pub struct ChannelEventCache {
    path: PathBuf,
    deployment_block: u64,
    write_lock: Mutex<()>,
}

impl ChannelEventCache {
    pub fn new(cache_dir: &Path, mpe_address: Address, deployment_block: u64) -> Self {
        let path = cache_dir
            .join(format!("{mpe_address:?}"))
            .join("channels.json");
        Self {
            path,
            deployment_block,
            write_lock: Mutex::new(()),
        }
    }

    /// Scan blocks past the persisted position for channel-open events and
    /// persist the grown index. Idempotent when the chain has not advanced;
    /// a failed scan or write leaves the previous snapshot in place.
    pub async fn refresh(&self, ledger: &dyn EscrowLedger) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        let current_block = ledger.current_block_number().await?;
        if file.last_read_block >= current_block {
            return Ok(());
        }

        for (from_block, to_block) in scan_windows(file.last_read_block + 1, current_block) {
            let records = ledger.channel_open_events(from_block, to_block).await?;
            file.channels.extend(records);
        }
        file.last_read_block = current_block;
        self.store(&file).await
    }

    /// Cached records opened by this caller (as sender or signer) for the
    /// exact (recipient, group) pair.
    pub async fn channels_for(
        &self,
        sender: Address,
        signer: Address,
        recipient: Address,
        group_id: GroupId,
    ) -> Result<Vec<ChannelEventRecord>> {
        let file = self.load().await?;
        Ok(file
            .channels
            .into_iter()
            .filter(|record| {
                (record.sender == sender || record.signer == signer)
                    && record.recipient == recipient
                    && record.group_id == group_id
            })
            .collect())
    }

    pub(crate) async fn load(&self) -> Result<CacheFile> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    path = %self.path.display(),
                    deployment_block = self.deployment_block,
                    "no channel cache yet; first scan starts at the deployment block"
                );
                return Ok(self.empty());
            }
            Err(err) => {
                return Err(Error::CacheCorruption(format!(
                    "cannot read {}: {err}",
                    self.path.display()
                )))
            }
        };
        match serde_json::from_slice::<CacheFile>(&bytes) {
            Ok(file) if file.version == CACHE_FORMAT_VERSION => Ok(file),
            Ok(file) => {
                warn!(
                    version = file.version,
                    "channel cache has an unsupported format version; rebuilding"
                );
                Ok(self.empty())
            }
            Err(err) => {
                warn!(
                    %err,
                    path = %self.path.display(),
                    "channel cache unreadable; rebuilding from the deployment block"
                );
                Ok(self.empty())
            }
        }
    }

    /// Write-temp-then-rename so a crash mid-write never clobbers the
    /// previous snapshot.
    pub(crate) async fn store(&self, file: &CacheFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn empty(&self) -> CacheFile {
        CacheFile {
            version: CACHE_FORMAT_VERSION,
            // one before the deployment block, so the first scan window
            // covers the deployment block itself
            last_read_block: self.deployment_block.saturating_sub(1),
            channels: Vec::new(),
        }
    }
}

/// Inclusive scan windows of at most `BLOCKS_PER_BATCH + 1` blocks covering
/// `[from_block, to_block]`.
pub(crate) fn scan_windows(from_block: u64, to_block: u64) -> Vec<(u64, u64)> {
    let mut windows = Vec::new();
    let mut cursor = from_block;
    while cursor <= to_block {
        let end = to_block.min(cursor.saturating_add(BLOCKS_PER_BATCH));
        windows.push((cursor, end));
        cursor = end + 1;
    }
    windows
}
