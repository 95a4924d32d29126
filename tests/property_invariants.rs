//! Property-based tests for the ledger and block invariants.

use proptest::prelude::*;

use blackhole_node::block::Block;
use blackhole_node::executor::{self, ExecutionOutcome};
use blackhole_node::hashing;
use blackhole_node::params::{BHX_SYMBOL, STAKING_CONTRACT, SYSTEM_ADDRESS};
use blackhole_node::stake::StakeLedger;
use blackhole_node::token::{TokenDescriptor, TokenLedger};
use blackhole_node::transaction::{Transaction, TxKind};

/// A randomly generated ledger operation.
#[derive(Debug, Clone)]
enum Op {
    Transfer { from: u8, to: u8, amount: u64 },
    Deposit { who: u8, amount: u64 },
    Withdraw { who: u8, amount: u64 },
}

fn addr(i: u8) -> String {
    format!("acct-{}", i % 6)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<u8>(), any::<u8>(), 0u64..5_000).prop_map(|(from, to, amount)| Op::Transfer {
            from,
            to,
            amount
        }),
        (any::<u8>(), 0u64..5_000).prop_map(|(who, amount)| Op::Deposit { who, amount }),
        (any::<u8>(), 0u64..5_000).prop_map(|(who, amount)| Op::Withdraw { who, amount }),
    ]
}

fn funded_ledgers() -> (TokenLedger, StakeLedger) {
    let tokens = TokenLedger::new();
    tokens
        .register(TokenDescriptor {
            name: "Blackhole".into(),
            symbol: BHX_SYMBOL.into(),
            decimals: 8,
            minter: None,
        })
        .unwrap();
    tokens.mint(BHX_SYMBOL, SYSTEM_ADDRESS, 1_000_000).unwrap();
    for i in 0..6u8 {
        tokens
            .transfer(BHX_SYMBOL, SYSTEM_ADDRESS, &addr(i), 10_000)
            .unwrap();
    }
    (tokens, StakeLedger::new())
}

fn to_tx(op: &Op, nonce: u64) -> Transaction {
    match op {
        Op::Transfer { from, to, amount } => Transaction::new_at(
            TxKind::TokenTransfer,
            addr(*from),
            addr(*to),
            BHX_SYMBOL,
            *amount,
            nonce,
            1_700_000_000,
        ),
        Op::Deposit { who, amount } => Transaction::new_at(
            TxKind::StakeDeposit,
            addr(*who),
            STAKING_CONTRACT,
            BHX_SYMBOL,
            *amount,
            nonce,
            1_700_000_000,
        ),
        Op::Withdraw { who, amount } => Transaction::new_at(
            TxKind::StakeWithdraw,
            addr(*who),
            "",
            BHX_SYMBOL,
            *amount,
            nonce,
            1_700_000_000,
        ),
    }
}

fn sum_balances(tokens: &TokenLedger) -> u64 {
    tokens
        .all_balances()
        .get(BHX_SYMBOL)
        .map(|balances| balances.values().sum())
        .unwrap_or(0)
}

proptest! {
    /// Total supply equals the sum of balances after any operation mix,
    /// applied or skipped.
    #[test]
    fn conservation_holds_under_random_operations(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let (tokens, stakes) = funded_ledgers();
        let supply = tokens.total_supply(BHX_SYMBOL);
        for (nonce, op) in ops.iter().enumerate() {
            let _ = executor::execute(&to_tx(op, nonce as u64), &tokens, &stakes);
            prop_assert_eq!(tokens.total_supply(BHX_SYMBOL), supply);
            prop_assert_eq!(sum_balances(&tokens), supply);
        }
    }

    /// The staking contract's balance always equals the sum of all stakes.
    #[test]
    fn stake_custody_equality(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let (tokens, stakes) = funded_ledgers();
        for (nonce, op) in ops.iter().enumerate() {
            let _ = executor::execute(&to_tx(op, nonce as u64), &tokens, &stakes);
            prop_assert_eq!(
                stakes.total(),
                tokens.balance_of(BHX_SYMBOL, STAKING_CONTRACT)
            );
        }
    }

    /// A failing apply leaves the ledgers byte-identical to their
    /// pre-state.
    #[test]
    fn failed_apply_changes_nothing(op in op_strategy(), nonce in 0u64..100) {
        let (tokens, stakes) = funded_ledgers();
        // Drain one account so some operations fail.
        tokens
            .transfer(BHX_SYMBOL, &addr(0), SYSTEM_ADDRESS, tokens.balance_of(BHX_SYMBOL, &addr(0)))
            .unwrap();
        let token_snapshot = tokens.snapshot();
        let stake_snapshot = stakes.snapshot();
        if let ExecutionOutcome::Skipped(_) = executor::execute(&to_tx(&op, nonce), &tokens, &stakes) {
            prop_assert_eq!(tokens.snapshot(), token_snapshot);
            prop_assert_eq!(stakes.snapshot(), stake_snapshot);
        }
    }

    /// Block hashes are stable under recomputation, and the Merkle root
    /// matches the transaction list for arbitrary contents.
    #[test]
    fn block_hash_and_merkle_stability(
        amounts in proptest::collection::vec(1u64..10_000, 0..8),
        stake_snapshot in 0u64..1_000_000,
    ) {
        let txs: Vec<Transaction> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                Transaction::new_at(
                    TxKind::TokenTransfer,
                    "alice",
                    "bob",
                    BHX_SYMBOL,
                    *amount,
                    i as u64,
                    1_700_000_000,
                )
            })
            .collect();
        let block = Block::new(1, txs.clone(), "aa".repeat(32), "v1", stake_snapshot);
        prop_assert!(block.verify_hash());
        let ids: Vec<String> = txs.iter().map(|tx| tx.id.clone()).collect();
        prop_assert_eq!(hashing::merkle_root(&ids), block.header.merkle_root.clone());
        // Hash covers the header fields.
        let mut tampered = block.clone();
        tampered.header.stake_snapshot = stake_snapshot.wrapping_add(1);
        prop_assert!(!tampered.verify_hash());
    }

    /// Transaction ids are a pure function of the business fields.
    #[test]
    fn transaction_id_purity(
        amount in 1u64..1_000_000,
        nonce in 0u64..1_000,
        timestamp in 0i64..2_000_000_000,
    ) {
        let a = Transaction::new_at(TxKind::TokenTransfer, "alice", "bob", BHX_SYMBOL, amount, nonce, timestamp);
        let b = Transaction::new_at(TxKind::TokenTransfer, "alice", "bob", BHX_SYMBOL, amount, nonce, timestamp);
        prop_assert_eq!(&a.id, &b.id);
        let c = Transaction::new_at(TxKind::StakeDeposit, "alice", "bob", BHX_SYMBOL, amount, nonce, timestamp);
        prop_assert_ne!(&a.id, &c.id);
    }

    /// Merkle roots are order sensitive and deterministic.
    #[test]
    fn merkle_root_determinism(ids in proptest::collection::vec("[a-f0-9]{64}", 1..16)) {
        let root_a = hashing::merkle_root(&ids);
        let root_b = hashing::merkle_root(&ids);
        prop_assert_eq!(&root_a, &root_b);
        if ids.len() > 1 && ids[0] != ids[1] {
            let mut swapped = ids.clone();
            swapped.swap(0, 1);
            prop_assert_ne!(&root_a, &hashing::merkle_root(&swapped));
        }
    }
}
