//! Persistent key-value store for account state and blocks.
//!
//! The store is a directory of JSON files, one per key. Account records are
//! authoritative across restarts; blocks and the tip marker are optional
//! and re-derivable from peers. Addresses are hex-encoded in file names so
//! arbitrary key bytes stay filesystem-safe.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::block::Block;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Native account record as persisted under `account:<address>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u64,
    pub nonce: u64,
}

/// Directory-backed store. Writes go through `tokio::fs` so callers can
/// persist while other tasks keep running.
#[derive(Debug)]
pub struct KvStore {
    path: PathBuf,
}

impl KvStore {
    /// Open or create a store at the given directory.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StorageError> {
        let path = path.into();
        fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn account_path(&self, address: &str) -> PathBuf {
        self.path.join(format!("account_{}.json", hex::encode(address)))
    }

    fn block_path(&self, index: u64) -> PathBuf {
        self.path.join(format!("block_{index:020}.json"))
    }

    pub async fn save_account(&self, address: &str, state: &AccountState) -> Result<(), StorageError> {
        let data = serde_json::to_vec(state).map_err(|e| StorageError::Corrupt {
            key: format!("account:{address}"),
            reason: e.to_string(),
        })?;
        fs::write(self.account_path(address), data).await?;
        Ok(())
    }

    pub async fn load_account(&self, address: &str) -> Result<Option<AccountState>, StorageError> {
        match fs::read(self.account_path(address)).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                    key: format!("account:{address}"),
                    reason: e.to_string(),
                })?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every persisted account, rebuilt for startup. Unreadable records are
    /// skipped rather than failing the whole boot.
    pub async fn load_accounts(&self) -> Result<Vec<(String, AccountState)>, StorageError> {
        let mut accounts = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(encoded) = name
                .strip_prefix("account_")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            let Ok(raw) = hex::decode(encoded) else { continue };
            let Ok(address) = String::from_utf8(raw) else { continue };
            if let Some(state) = self.load_account(&address).await? {
                accounts.push((address, state));
            }
        }
        Ok(accounts)
    }

    pub async fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let data = serde_json::to_vec(block).map_err(|e| StorageError::Corrupt {
            key: format!("block:{}", block.header.index),
            reason: e.to_string(),
        })?;
        fs::write(self.block_path(block.header.index), data).await?;
        Ok(())
    }

    pub async fn load_block(&self, index: u64) -> Result<Option<Block>, StorageError> {
        match fs::read(self.block_path(index)).await {
            Ok(bytes) => {
                let block = serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                    key: format!("block:{index}"),
                    reason: e.to_string(),
                })?;
                Ok(Some(block))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove persisted blocks above the given index after a reorganization.
    pub async fn truncate_blocks_after(&self, index: u64) -> Result<(), StorageError> {
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(num) = name
                .strip_prefix("block_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            if num > index {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    pub async fn save_tip(&self, index: u64) -> Result<(), StorageError> {
        fs::write(self.path.join("meta_tip"), index.to_be_bytes()).await?;
        Ok(())
    }

    pub async fn load_tip(&self) -> Result<Option<u64>, StorageError> {
        match fs::read(self.path.join("meta_tip")).await {
            Ok(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StorageError::Corrupt {
                    key: "meta:tip".into(),
                    reason: format!("expected 8 bytes, got {}", bytes.len()),
                })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
