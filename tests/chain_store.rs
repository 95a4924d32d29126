//! Integration tests for the chain store: boot, transfers, staking, fork
//! choice, out-of-order arrival and reorganization.

use std::sync::Arc;

use tokio::sync::mpsc;

use blackhole_node::block::Block;
use blackhole_node::chain::{BlockOutcome, ChainStore, Outbound};
use blackhole_node::events::EventBus;
use blackhole_node::params::{
    BHX_SYMBOL, BLOCK_REWARD, GENESIS_STAKE, GENESIS_VALIDATOR, INITIAL_SUPPLY, STAKING_CONTRACT,
    SYSTEM_ADDRESS,
};
use blackhole_node::stake::StakeLedger;
use blackhole_node::token::TokenLedger;
use blackhole_node::transaction::{Transaction, TxError, TxKind};

async fn fresh_chain() -> (ChainStore, mpsc::UnboundedReceiver<Outbound>) {
    let tokens = Arc::new(TokenLedger::new());
    let stakes = Arc::new(StakeLedger::new());
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let chain = ChainStore::bootstrap(tokens, stakes, EventBus::default(), outbox_tx, None, 1024)
        .await
        .expect("bootstrap");
    (chain, outbox_rx)
}

fn next_block(chain: &ChainStore, txs: Vec<Transaction>, validator: &str) -> Block {
    let tip = chain.tip().clone();
    Block::new(
        tip.header.index + 1,
        txs,
        tip.hash,
        validator,
        chain.stakes().get(validator),
    )
}

fn reward(to: &str, nonce: u64) -> Transaction {
    Transaction::new(TxKind::TokenTransfer, SYSTEM_ADDRESS, to, BHX_SYMBOL, BLOCK_REWARD, nonce)
}

fn transfer(from: &str, to: &str, amount: u64, nonce: u64) -> Transaction {
    Transaction::new(TxKind::TokenTransfer, from, to, BHX_SYMBOL, amount, nonce)
}

#[tokio::test]
async fn genesis_boot_state() {
    let (chain, _rx) = fresh_chain().await;
    assert_eq!(chain.height(), 1);
    assert_eq!(
        chain.tokens().balance_of(BHX_SYMBOL, GENESIS_VALIDATOR),
        BLOCK_REWARD
    );
    assert_eq!(chain.stakes().get(GENESIS_VALIDATOR), GENESIS_STAKE);
    assert_eq!(chain.tokens().total_supply(BHX_SYMBOL), INITIAL_SUPPLY);
    assert_eq!(
        chain.tokens().balance_of(BHX_SYMBOL, STAKING_CONTRACT),
        GENESIS_STAKE
    );
    // The genesis hash is a pure function of fixed constants.
    assert_eq!(chain.tip().hash, Block::genesis().hash);
}

#[tokio::test]
async fn simple_transfer_commits() {
    let (mut chain, _rx) = fresh_chain().await;
    chain.admin_mint(BHX_SYMBOL, "A", 1000).await.unwrap();
    let supply = chain.tokens().total_supply(BHX_SYMBOL);

    chain
        .submit_local_transaction(transfer("A", "B", 100, 1))
        .unwrap();
    assert_eq!(chain.mempool_len(), 1);

    let block = chain.build_candidate(GENESIS_VALIDATOR, 100);
    assert_eq!(block.transactions[0].from, SYSTEM_ADDRESS);
    assert_eq!(chain.add_block(block).await, BlockOutcome::Accepted);

    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "A"), 900);
    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "B"), 100);
    assert_eq!(chain.tokens().total_supply(BHX_SYMBOL), supply);
    assert_eq!(chain.mempool_len(), 0);
    assert_eq!(chain.height(), 2);
}

#[tokio::test]
async fn insufficient_balance_rejected_at_admission() {
    let (mut chain, _rx) = fresh_chain().await;
    chain.admin_mint(BHX_SYMBOL, "A", 50).await.unwrap();
    let err = chain
        .submit_local_transaction(transfer("A", "B", 100, 1))
        .unwrap_err();
    assert_eq!(err, TxError::InsufficientBalance { have: 50, need: 100 });
    assert_eq!(chain.mempool_len(), 0);
}

#[tokio::test]
async fn stake_deposit_then_withdraw() {
    let (mut chain, _rx) = fresh_chain().await;
    chain.admin_mint(BHX_SYMBOL, "A", 500).await.unwrap();
    let custody_before = chain.tokens().balance_of(BHX_SYMBOL, STAKING_CONTRACT);

    let deposit = Transaction::new(
        TxKind::StakeDeposit,
        "A",
        STAKING_CONTRACT,
        BHX_SYMBOL,
        300,
        1,
    );
    chain.submit_local_transaction(deposit).unwrap();
    let block = chain.build_candidate(GENESIS_VALIDATOR, 100);
    assert_eq!(chain.add_block(block).await, BlockOutcome::Accepted);

    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "A"), 200);
    assert_eq!(
        chain.tokens().balance_of(BHX_SYMBOL, STAKING_CONTRACT),
        custody_before + 300
    );
    assert_eq!(chain.stakes().get("A"), 300);

    let withdraw = Transaction::new(TxKind::StakeWithdraw, "A", "", BHX_SYMBOL, 100, 2);
    chain.submit_local_transaction(withdraw).unwrap();
    let block = chain.build_candidate(GENESIS_VALIDATOR, 100);
    assert_eq!(chain.add_block(block).await, BlockOutcome::Accepted);

    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "A"), 300);
    assert_eq!(
        chain.tokens().balance_of(BHX_SYMBOL, STAKING_CONTRACT),
        custody_before + 200
    );
    assert_eq!(chain.stakes().get("A"), 200);

    // Custody equality after every commit.
    assert_eq!(
        chain.stakes().total(),
        chain.tokens().balance_of(BHX_SYMBOL, STAKING_CONTRACT)
    );
}

#[tokio::test]
async fn duplicate_block_is_idempotent() {
    let (mut chain, _rx) = fresh_chain().await;
    chain.admin_mint(BHX_SYMBOL, "A", 100).await.unwrap();
    let block = next_block(&chain, vec![reward(GENESIS_VALIDATOR, 1)], GENESIS_VALIDATOR);

    assert_eq!(chain.add_block(block.clone()).await, BlockOutcome::Accepted);
    let balance_after = chain.tokens().balance_of(BHX_SYMBOL, GENESIS_VALIDATOR);
    let tip_after = chain.tip().hash.clone();

    assert_eq!(chain.add_block(block).await, BlockOutcome::Duplicate);
    assert_eq!(
        chain.tokens().balance_of(BHX_SYMBOL, GENESIS_VALIDATOR),
        balance_after
    );
    assert_eq!(chain.tip().hash, tip_after);
    assert_eq!(chain.height(), 2);
}

#[tokio::test]
async fn stale_block_is_ignored() {
    let (mut chain, _rx) = fresh_chain().await;
    let b1 = next_block(&chain, vec![], GENESIS_VALIDATOR);
    assert_eq!(chain.add_block(b1).await, BlockOutcome::Accepted);
    let b2 = next_block(&chain, vec![], GENESIS_VALIDATOR);
    assert_eq!(chain.add_block(b2).await, BlockOutcome::Accepted);

    let stale = Block::new(1, vec![], chain.tip().header.previous_hash.clone(), "other", 7);
    assert_eq!(chain.add_block(stale).await, BlockOutcome::StaleIgnored);
    assert_eq!(chain.height(), 3);
}

#[tokio::test]
async fn tampered_block_is_invalid() {
    let (mut chain, _rx) = fresh_chain().await;
    let mut block = next_block(&chain, vec![], GENESIS_VALIDATOR);
    block.header.stake_snapshot += 1;
    assert!(matches!(
        chain.add_block(block).await,
        BlockOutcome::Invalid(_)
    ));
    assert_eq!(chain.height(), 1);
}

#[tokio::test]
async fn sibling_tie_break_prefers_smaller_hash() {
    let (mut chain, _rx) = fresh_chain().await;
    let a = next_block(&chain, vec![], "validator-a");
    let b = next_block(&chain, vec![], "validator-b");
    assert_eq!(a.header.stake_snapshot, b.header.stake_snapshot);
    let (small, big) = if a.hash < b.hash { (a, b) } else { (b, a) };

    // Larger hash adopted first; the smaller-hash sibling replaces it.
    assert_eq!(chain.add_block(big.clone()).await, BlockOutcome::Accepted);
    assert_eq!(chain.add_block(small.clone()).await, BlockOutcome::Accepted);
    assert_eq!(chain.tip().hash, small.hash);
    assert_eq!(chain.height(), 2);

    // The losing sibling cannot displace the winner.
    assert_eq!(chain.add_block(big).await, BlockOutcome::ForkRejected);
    assert_eq!(chain.tip().hash, small.hash);
}

#[tokio::test]
async fn sibling_with_more_stake_wins_regardless_of_hash() {
    let (mut chain, _rx) = fresh_chain().await;
    let weak = next_block(&chain, vec![], "validator-a");
    let tip = chain.tip().clone();
    let strong = Block::new(1, vec![], tip.hash, "validator-b", 9_999);

    assert_eq!(chain.add_block(weak).await, BlockOutcome::Accepted);
    assert_eq!(chain.add_block(strong.clone()).await, BlockOutcome::Accepted);
    assert_eq!(chain.tip().hash, strong.hash);
}

#[tokio::test]
async fn out_of_order_arrival_queues_and_drains() {
    let (mut chain, mut rx) = fresh_chain().await;
    let b1 = next_block(&chain, vec![reward(GENESIS_VALIDATOR, 1)], GENESIS_VALIDATOR);
    let b2 = Block::new(2, vec![], b1.hash.clone(), GENESIS_VALIDATOR, GENESIS_STAKE);

    assert_eq!(chain.add_block(b2.clone()).await, BlockOutcome::FutureQueued);
    assert!(chain.has_pending_block(2));
    match rx.try_recv() {
        Ok(Outbound::SyncRequest { start, end }) => {
            assert_eq!((start, end), (1, 1));
        }
        other => panic!("expected a sync request, got {other:?}"),
    }

    assert_eq!(chain.add_block(b1).await, BlockOutcome::Accepted);
    assert_eq!(chain.height(), 3);
    assert_eq!(chain.tip().hash, b2.hash);
    assert_eq!(chain.pending_block_count(), 0);
}

#[tokio::test]
async fn mislinked_pending_block_is_dropped() {
    let (mut chain, _rx) = fresh_chain().await;
    let b1 = next_block(&chain, vec![], GENESIS_VALIDATOR);
    let orphan = Block::new(2, vec![], "bb".repeat(32), GENESIS_VALIDATOR, GENESIS_STAKE);

    assert_eq!(chain.add_block(orphan).await, BlockOutcome::FutureQueued);
    assert_eq!(chain.add_block(b1).await, BlockOutcome::Accepted);
    // The orphan never linked; it was discarded during the drain.
    assert_eq!(chain.height(), 2);
    assert_eq!(chain.pending_block_count(), 0);
}

#[tokio::test]
async fn causal_permutations_reach_the_same_tip() {
    // Build a three-block extension once, then feed it to two stores in
    // different causally-valid orders.
    let (mut source, _rx) = fresh_chain().await;
    let b1 = next_block(&source, vec![reward(GENESIS_VALIDATOR, 1)], GENESIS_VALIDATOR);
    source.add_block(b1.clone()).await;
    let b2 = next_block(&source, vec![reward(GENESIS_VALIDATOR, 2)], GENESIS_VALIDATOR);
    source.add_block(b2.clone()).await;
    let b3 = next_block(&source, vec![], GENESIS_VALIDATOR);
    source.add_block(b3.clone()).await;

    let (mut forward, _rx1) = fresh_chain().await;
    for b in [b1.clone(), b2.clone(), b3.clone()] {
        forward.add_block(b).await;
    }

    let (mut reversed, _rx2) = fresh_chain().await;
    assert_eq!(reversed.add_block(b3).await, BlockOutcome::FutureQueued);
    assert_eq!(reversed.add_block(b2).await, BlockOutcome::FutureQueued);
    assert_eq!(reversed.add_block(b1).await, BlockOutcome::Accepted);

    assert_eq!(forward.tip().hash, reversed.tip().hash);
    assert_eq!(forward.height(), 4);
    assert_eq!(reversed.height(), 4);
    assert_eq!(
        forward.tokens().balance_of(BHX_SYMBOL, GENESIS_VALIDATOR),
        reversed.tokens().balance_of(BHX_SYMBOL, GENESIS_VALIDATOR)
    );
}

#[tokio::test]
async fn deep_fork_replaces_chain_and_replays_state() {
    // Local chain: genesis -> L1 -> L2. Fork diverging at genesis:
    // genesis -> F1 -> F2 -> F3, strictly longer, different rewards.
    let (mut chain, _rx) = fresh_chain().await;
    let genesis_hash = chain.tip().hash.clone();

    let l1 = next_block(&chain, vec![reward("local-validator", 1)], "local-validator");
    assert_eq!(chain.add_block(l1).await, BlockOutcome::Accepted);
    let l2 = next_block(&chain, vec![reward("local-validator", 2)], "local-validator");
    assert_eq!(chain.add_block(l2).await, BlockOutcome::Accepted);
    assert_eq!(
        chain.tokens().balance_of(BHX_SYMBOL, "local-validator"),
        2 * BLOCK_REWARD
    );

    let f1 = Block::new(1, vec![reward("fork-validator", 1)], genesis_hash, "fork-validator", 800);
    let f2 = Block::new(2, vec![reward("fork-validator", 2)], f1.hash.clone(), "fork-validator", 800);
    let f3 = Block::new(3, vec![reward("fork-validator", 3)], f2.hash.clone(), "fork-validator", 800);

    // Below the tip: ignored, but retained as fork ancestry.
    assert_eq!(chain.add_block(f1).await, BlockOutcome::StaleIgnored);
    // At the tip but diverging earlier: ties on length, cannot win yet.
    assert_eq!(chain.add_block(f2).await, BlockOutcome::ForkRejected);
    // F3 completes a strictly longer chain through the buffered ancestors.
    assert_eq!(chain.add_block(f3.clone()).await, BlockOutcome::Accepted);

    assert_eq!(chain.height(), 4);
    assert_eq!(chain.tip().hash, f3.hash);
    // State was replayed along the new chain: the local rewards are gone.
    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "local-validator"), 0);
    assert_eq!(
        chain.tokens().balance_of(BHX_SYMBOL, "fork-validator"),
        3 * BLOCK_REWARD
    );
    assert_eq!(chain.tokens().total_supply(BHX_SYMBOL), INITIAL_SUPPLY);
}

#[tokio::test]
async fn failing_transaction_is_skipped_but_block_commits() {
    let (mut chain, _rx) = fresh_chain().await;
    chain.admin_mint(BHX_SYMBOL, "A", 100).await.unwrap();

    // Admitted while solvent, broke by execution time.
    let overdraft = transfer("A", "B", 90, 1);
    let drain = transfer("A", "C", 60, 2);
    let block = next_block(&chain, vec![drain, overdraft], GENESIS_VALIDATOR);
    assert_eq!(chain.add_block(block).await, BlockOutcome::Accepted);

    assert_eq!(chain.height(), 2);
    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "C"), 60);
    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "B"), 0);
    assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "A"), 40);
}

#[tokio::test]
async fn system_transactions_are_rejected_from_public_paths() {
    let (mut chain, _rx) = fresh_chain().await;
    let fake_reward = reward("mallory", 1);
    assert_eq!(
        chain.submit_local_transaction(fake_reward.clone()).unwrap_err(),
        TxError::PrivilegedOrigin
    );
    assert_eq!(
        chain.accept_remote_transaction(fake_reward).unwrap_err(),
        TxError::PrivilegedOrigin
    );
}

#[tokio::test]
async fn local_submission_relays_to_the_outbox() {
    let (mut chain, mut rx) = fresh_chain().await;
    chain.admin_mint(BHX_SYMBOL, "A", 100).await.unwrap();
    let tx = transfer("A", "B", 10, 1);
    let id = chain.submit_local_transaction(tx.clone()).unwrap();
    assert_eq!(id, tx.id);
    match rx.try_recv() {
        Ok(Outbound::Transaction(relayed)) => assert_eq!(relayed.id, tx.id),
        other => panic!("expected a relayed transaction, got {other:?}"),
    }

    // The same transaction from a peer is not re-relayed.
    let (mut chain2, mut rx2) = fresh_chain().await;
    chain2.admin_mint(BHX_SYMBOL, "A", 100).await.unwrap();
    chain2.accept_remote_transaction(tx).unwrap();
    assert!(rx2.try_recv().is_err());
}
