//! Timer-driven block production.
//!
//! Every node runs the same deterministic leader rule: the active validator
//! with the highest stake owns the current time slot. A node that finds
//! itself leader drains the mempool into a block, commits it locally and
//! hands it to the outbox for broadcast. One block per slot at most.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::chain::{BlockOutcome, ChainStore, Outbound};
use crate::stake::StakeLedger;

pub struct Miner {
    chain: Arc<RwLock<ChainStore>>,
    stakes: Arc<StakeLedger>,
    outbox: mpsc::UnboundedSender<Outbound>,
    validator_id: String,
    interval: Duration,
    max_block_txs: usize,
}

impl Miner {
    pub fn new(
        chain: Arc<RwLock<ChainStore>>,
        stakes: Arc<StakeLedger>,
        outbox: mpsc::UnboundedSender<Outbound>,
        validator_id: impl Into<String>,
        interval: Duration,
        max_block_txs: usize,
    ) -> Self {
        Self {
            chain,
            stakes,
            outbox,
            validator_id: validator_id.into(),
            interval,
            max_block_txs,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_slot: Option<u64> = None;
        info!(validator = %self.validator_id, interval = ?self.interval, "miner started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(&mut last_slot).await,
                _ = shutdown.recv() => {
                    info!("miner stopping");
                    return;
                }
            }
        }
    }

    async fn tick(&self, last_slot: &mut Option<u64>) {
        let slot = Utc::now().timestamp() as u64 / self.interval.as_secs().max(1);
        if *last_slot == Some(slot) {
            return;
        }
        let Some(leader) = self.stakes.highest_stake_validator() else {
            debug!("no active validators, skipping slot");
            return;
        };
        if leader != self.validator_id {
            debug!(slot, %leader, "not leader this slot");
            return;
        }
        *last_slot = Some(slot);

        // Build and commit under the write lock, broadcast after releasing
        // it. The network must never be awaited inside the exclusive
        // region.
        let committed = {
            let mut chain = self.chain.write().await;
            let block = chain.build_candidate(&self.validator_id, self.max_block_txs);
            match chain.add_block(block.clone()).await {
                BlockOutcome::Accepted => Some(block),
                outcome => {
                    warn!(?outcome, "own candidate block was not accepted");
                    None
                }
            }
        };
        if let Some(block) = committed {
            info!(
                index = block.header.index,
                hash = %block.hash,
                txs = block.transactions.len(),
                "produced block"
            );
            let _ = self.outbox.send(Outbound::Block(block));
        }
    }
}
