//! Validator stake ledger and leader selection.
//!
//! Stake values are the authoritative validator weight. A stake of zero
//! means "not a validator"; a jailed validator is tagged separately and is
//! excluded from leader selection regardless of its stake.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StakeError {
    #[error("insufficient stake: have {have}, need {need}")]
    InsufficientStake { have: u64, need: u64 },
    #[error("stake would overflow")]
    StakeOverflow,
}

#[derive(Debug, Default, Clone)]
struct StakeState {
    stakes: HashMap<String, u64>,
    jailed: HashSet<String>,
}

/// Stake assignments behind their own reader-writer lock, so leader checks
/// and API queries never contend with the chain store's lock.
#[derive(Debug, Default)]
pub struct StakeLedger {
    inner: RwLock<StakeState>,
}

impl StakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: &str) -> u64 {
        self.inner.read().unwrap().stakes.get(addr).copied().unwrap_or(0)
    }

    pub fn set(&self, addr: &str, value: u64) {
        self.inner
            .write()
            .unwrap()
            .stakes
            .insert(addr.to_string(), value);
    }

    pub fn add(&self, addr: &str, delta: u64) -> Result<(), StakeError> {
        let mut state = self.inner.write().unwrap();
        let current = state.stakes.get(addr).copied().unwrap_or(0);
        let updated = current.checked_add(delta).ok_or(StakeError::StakeOverflow)?;
        state.stakes.insert(addr.to_string(), updated);
        Ok(())
    }

    pub fn remove(&self, addr: &str, delta: u64) -> Result<(), StakeError> {
        let mut state = self.inner.write().unwrap();
        let have = state.stakes.get(addr).copied().unwrap_or(0);
        if have < delta {
            return Err(StakeError::InsufficientStake { have, need: delta });
        }
        state.stakes.insert(addr.to_string(), have - delta);
        Ok(())
    }

    /// Zero the validator's stake and tag it as jailed.
    pub fn jail(&self, addr: &str) {
        let mut state = self.inner.write().unwrap();
        state.stakes.insert(addr.to_string(), 0);
        state.jailed.insert(addr.to_string());
    }

    pub fn is_jailed(&self, addr: &str) -> bool {
        self.inner.read().unwrap().jailed.contains(addr)
    }

    /// Owned copy of the stake map.
    pub fn all(&self) -> HashMap<String, u64> {
        self.inner.read().unwrap().stakes.clone()
    }

    /// Sum of all stakes, jailed validators included (their stake is zero).
    pub fn total(&self) -> u64 {
        self.inner.read().unwrap().stakes.values().sum()
    }

    /// Number of validators with positive stake that are not jailed.
    pub fn active_count(&self) -> usize {
        let state = self.inner.read().unwrap();
        state
            .stakes
            .iter()
            .filter(|(addr, stake)| **stake > 0 && !state.jailed.contains(*addr))
            .count()
    }

    /// The active validator with the greatest stake. Ties break on the
    /// lexicographically smaller address so every node agrees.
    pub fn highest_stake_validator(&self) -> Option<String> {
        let state = self.inner.read().unwrap();
        state
            .stakes
            .iter()
            .filter(|(addr, stake)| **stake > 0 && !state.jailed.contains(*addr))
            .max_by(|(addr_a, stake_a), (addr_b, stake_b)| {
                stake_a.cmp(stake_b).then_with(|| addr_b.cmp(addr_a))
            })
            .map(|(addr, _)| addr.clone())
    }

    /// Stake-weighted random selection over the active validators.
    ///
    /// Draws `r` in `[0, total)` and walks the validators in address order,
    /// accumulating stake until the running sum exceeds `r`.
    pub fn select_weighted_random(&self) -> Option<String> {
        let state = self.inner.read().unwrap();
        let mut active: Vec<(&String, u64)> = state
            .stakes
            .iter()
            .filter(|(addr, stake)| **stake > 0 && !state.jailed.contains(*addr))
            .map(|(addr, stake)| (addr, *stake))
            .collect();
        if active.is_empty() {
            return None;
        }
        active.sort_by(|a, b| a.0.cmp(b.0));
        let total: u64 = active.iter().map(|(_, s)| s).sum();
        let r = rand::rng().random_range(0..total);
        let mut cumulative = 0u64;
        for (addr, stake) in active {
            cumulative += stake;
            if cumulative > r {
                return Some(addr.clone());
            }
        }
        None
    }

    pub fn snapshot(&self) -> (HashMap<String, u64>, HashSet<String>) {
        let state = self.inner.read().unwrap();
        (state.stakes.clone(), state.jailed.clone())
    }

    pub fn restore(&self, stakes: HashMap<String, u64>, jailed: HashSet<String>) {
        let mut state = self.inner.write().unwrap();
        state.stakes = stakes;
        state.jailed = jailed;
    }
}
