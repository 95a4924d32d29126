//! Read-only snapshots of chain state.
//!
//! Everything here is assembled under the shared read lock and returned as
//! owned copies, so callers never hold chain state across an await.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::chain::ChainStore;
use crate::params::{BHX_SYMBOL, BLOCK_REWARD};

/// Compact description of a committed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub index: u64,
    pub hash: String,
    pub validator: String,
    pub timestamp: DateTime<Utc>,
    pub tx_count: usize,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            index: block.header.index,
            hash: block.hash.clone(),
            validator: block.header.validator.clone(),
            timestamp: block.header.timestamp,
            tx_count: block.transactions.len(),
        }
    }
}

/// Full snapshot served by the info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub height: u64,
    pub pending_tx_count: usize,
    pub total_supply: u64,
    pub block_reward: u64,
    pub recent_blocks: Vec<BlockSummary>,
    /// symbol -> address -> balance, staking contract included.
    pub token_balances: HashMap<String, HashMap<String, u64>>,
    pub stakes: HashMap<String, u64>,
}

/// Assemble a chain snapshot with the `recent` most recent block summaries.
pub fn chain_info(store: &ChainStore, recent: usize) -> ChainInfo {
    ChainInfo {
        height: store.height(),
        pending_tx_count: store.mempool_len(),
        total_supply: store.tokens().total_supply(BHX_SYMBOL),
        block_reward: BLOCK_REWARD,
        recent_blocks: store
            .recent_blocks(recent)
            .iter()
            .map(BlockSummary::from)
            .collect(),
        token_balances: store.tokens().all_balances(),
        stakes: store.stakes().all(),
    }
}
