//! Transaction pool.
//!
//! A bounded FIFO of transactions awaiting inclusion. Insertion order is
//! preserved and ids are de-duplicated. The pool is owned by the chain
//! store, which serializes access through its own lock.

use std::collections::{HashSet, VecDeque};

use crate::transaction::{Transaction, TxError};

#[derive(Debug)]
pub struct Mempool {
    pool: VecDeque<Transaction>,
    ids: HashSet<String>,
    max_size: usize,
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Self {
            pool: VecDeque::new(),
            ids: HashSet::new(),
            max_size,
        }
    }

    /// Append a transaction, rejecting duplicates and overflow.
    pub fn add(&mut self, tx: Transaction) -> Result<(), TxError> {
        if self.ids.contains(&tx.id) {
            return Err(TxError::DuplicateId(tx.id));
        }
        if self.pool.len() >= self.max_size {
            return Err(TxError::MempoolFull);
        }
        self.ids.insert(tx.id.clone());
        self.pool.push_back(tx);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// All pending transactions, oldest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.pool.iter().cloned().collect()
    }

    /// Remove and return up to `max` transactions from the front.
    pub fn take(&mut self, max: usize) -> Vec<Transaction> {
        let count = max.min(self.pool.len());
        let taken: Vec<Transaction> = self.pool.drain(..count).collect();
        for tx in &taken {
            self.ids.remove(&tx.id);
        }
        taken
    }

    /// Drop every pending transaction, e.g. after a block commit.
    pub fn clear(&mut self) {
        self.pool.clear();
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
