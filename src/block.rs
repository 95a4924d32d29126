//! Block model: header, body, hashing and validity checks.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::{self, ZERO_HASH};
use crate::params::{
    BHX_SYMBOL, BLOCK_REWARD, GENESIS_TIMESTAMP, GENESIS_VALIDATOR, MAX_TIMESTAMP_SKEW_SECS,
    SYSTEM_ADDRESS,
};
use crate::transaction::{Transaction, TxKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("block hash does not match its header")]
    HashMismatch,
    #[error("merkle root does not match the transaction list")]
    MerkleMismatch,
    #[error("block has no validator")]
    MissingValidator,
    #[error("block timestamp is too far from local time")]
    TimestampSkew,
    #[error("previous hash does not link to the chain tip")]
    BadPreviousHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub validator: String,
    /// The producer's stake at proposal time; the fork-choice weight.
    pub stake_snapshot: u64,
    pub merkle_root: String,
    pub state_root: String,
    pub receipts_root: String,
    pub consensus_round: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub hash: String,
}

impl Block {
    /// Build a block over the given transactions, stamped with the current
    /// wall clock.
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
        validator: impl Into<String>,
        stake_snapshot: u64,
    ) -> Self {
        Self::new_at(
            index,
            transactions,
            previous_hash,
            validator,
            stake_snapshot,
            Utc::now(),
        )
    }

    pub fn new_at(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
        validator: impl Into<String>,
        stake_snapshot: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let ids: Vec<String> = transactions.iter().map(|tx| tx.id.clone()).collect();
        let header = BlockHeader {
            index,
            timestamp,
            previous_hash: previous_hash.into(),
            validator: validator.into(),
            stake_snapshot,
            merkle_root: hashing::merkle_root(&ids),
            state_root: String::new(),
            receipts_root: String::new(),
            consensus_round: 0,
        };
        let hash = header.compute_hash();
        Self { header, transactions, hash }
    }

    /// The fixed genesis block. Every field is a constant, so its hash is
    /// identical on every node.
    pub fn genesis() -> Self {
        let timestamp: DateTime<Utc> = GENESIS_TIMESTAMP
            .parse()
            .expect("genesis timestamp constant is valid RFC 3339");
        let reward = Transaction::new_at(
            TxKind::TokenTransfer,
            SYSTEM_ADDRESS,
            GENESIS_VALIDATOR,
            BHX_SYMBOL,
            BLOCK_REWARD,
            0,
            timestamp.timestamp(),
        );
        Self::new_at(0, vec![reward], ZERO_HASH, GENESIS_VALIDATOR, 0, timestamp)
    }

    /// Recompute the hash from the header and compare. Any block read from
    /// the wire or from disk must pass this before it is considered.
    pub fn verify_hash(&self) -> bool {
        self.header.compute_hash() == self.hash
    }

    /// Full structural validity: hash, merkle root, validator, clock skew.
    pub fn validate(&self) -> Result<(), BlockError> {
        if !self.verify_hash() {
            return Err(BlockError::HashMismatch);
        }
        let ids: Vec<String> = self.transactions.iter().map(|tx| tx.id.clone()).collect();
        if hashing::merkle_root(&ids) != self.header.merkle_root {
            return Err(BlockError::MerkleMismatch);
        }
        if self.header.validator.is_empty() {
            return Err(BlockError::MissingValidator);
        }
        // The genesis timestamp is a constant from the past.
        if self.header.index > 0 {
            let skew = (Utc::now() - self.header.timestamp).num_seconds().abs();
            if skew > MAX_TIMESTAMP_SKEW_SECS {
                return Err(BlockError::TimestampSkew);
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl BlockHeader {
    /// The block hash covers index, RFC 3339 timestamp with nanoseconds,
    /// previous hash, validator, stake snapshot and merkle root, in that
    /// order.
    pub fn compute_hash(&self) -> String {
        let preimage = format!(
            "{}{}{}{}{}{}",
            self.index,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.previous_hash,
            self.validator,
            self.stake_snapshot,
            self.merkle_root,
        );
        hashing::sha256_hex(preimage.as_bytes())
    }
}
