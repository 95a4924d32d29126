//! Account state survives a node restart.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use blackhole_node::block::Block;
use blackhole_node::chain::{BlockOutcome, ChainStore};
use blackhole_node::events::EventBus;
use blackhole_node::params::{BHX_SYMBOL, GENESIS_VALIDATOR};
use blackhole_node::stake::StakeLedger;
use blackhole_node::storage::KvStore;
use blackhole_node::token::TokenLedger;
use blackhole_node::transaction::{Transaction, TxKind};

fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("blackhole-persist-{}-{}", tag, std::process::id()))
}

async fn chain_with_storage(dir: &PathBuf) -> ChainStore {
    let tokens = Arc::new(TokenLedger::new());
    let stakes = Arc::new(StakeLedger::new());
    let (outbox_tx, _outbox_rx) = mpsc::unbounded_channel();
    let storage = Arc::new(KvStore::open(dir.clone()).await.expect("open store"));
    ChainStore::bootstrap(
        tokens,
        stakes,
        EventBus::default(),
        outbox_tx,
        Some(storage),
        1024,
    )
    .await
    .expect("bootstrap")
}

#[tokio::test]
async fn balances_and_nonces_survive_restart() {
    let dir = scratch_dir("restart");
    let _ = tokio::fs::remove_dir_all(&dir).await;

    {
        let mut chain = chain_with_storage(&dir).await;
        chain.admin_mint(BHX_SYMBOL, "alice", 1000).await.unwrap();
        let tx = Transaction::new(TxKind::TokenTransfer, "alice", "bob", BHX_SYMBOL, 250, 1);
        chain.submit_local_transaction(tx).unwrap();
        let block = chain.build_candidate(GENESIS_VALIDATOR, 100);
        assert_eq!(chain.add_block(block).await, BlockOutcome::Accepted);
        assert_eq!(chain.tokens().balance_of(BHX_SYMBOL, "alice"), 750);
        assert_eq!(chain.nonce("alice"), 1);
    }

    // A second life over the same directory sees the same accounts.
    let restarted = chain_with_storage(&dir).await;
    assert_eq!(restarted.tokens().balance_of(BHX_SYMBOL, "alice"), 750);
    assert_eq!(restarted.tokens().balance_of(BHX_SYMBOL, "bob"), 250);
    assert_eq!(restarted.nonce("alice"), 1);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn committed_blocks_are_persisted() {
    let dir = scratch_dir("blocks");
    let _ = tokio::fs::remove_dir_all(&dir).await;

    let tip_hash = {
        let mut chain = chain_with_storage(&dir).await;
        let block = chain.build_candidate(GENESIS_VALIDATOR, 100);
        assert_eq!(chain.add_block(block).await, BlockOutcome::Accepted);
        chain.tip().hash.clone()
    };

    let store = KvStore::open(dir.clone()).await.unwrap();
    assert_eq!(store.load_tip().await.unwrap(), Some(1));
    let persisted: Block = store.load_block(1).await.unwrap().expect("block 1 persisted");
    assert_eq!(persisted.hash, tip_hash);
    assert!(persisted.verify_hash());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
