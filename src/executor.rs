//! Transaction execution against the token and stake ledgers.
//!
//! Execution is all-or-nothing per transaction: a failure leaves the ledgers
//! exactly as they were. Multi-step operations (stake deposits and
//! withdrawals) undo their first step when a later step fails.

use thiserror::Error;

use crate::params::{STAKING_CONTRACT, SYSTEM_ADDRESS};
use crate::stake::{StakeError, StakeLedger};
use crate::token::{TokenError, TokenLedger};
use crate::transaction::{Transaction, TxKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Stake(#[from] StakeError),
    #[error("{0} is not authorized to {1} this token")]
    NotAuthorized(String, &'static str),
}

/// What became of a transaction inside a committed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Applied,
    Skipped(String),
}

impl ExecutionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ExecutionOutcome::Applied)
    }
}

/// Apply a transaction, mapping any failure into a skip reason. Blocks
/// commit regardless of individual skips; the outcome records the policy
/// decision per transaction.
pub fn execute(tx: &Transaction, tokens: &TokenLedger, stakes: &StakeLedger) -> ExecutionOutcome {
    match apply(tx, tokens, stakes) {
        Ok(()) => ExecutionOutcome::Applied,
        Err(e) => ExecutionOutcome::Skipped(e.to_string()),
    }
}

/// Apply a transaction to the ledgers, or fail leaving them untouched.
pub fn apply(tx: &Transaction, tokens: &TokenLedger, stakes: &StakeLedger) -> Result<(), ExecError> {
    match tx.kind {
        TxKind::TokenTransfer => {
            // Reward transfers debit the treasury like any other sender;
            // their privilege is skipping signature and nonce checks, not
            // breaking conservation.
            tokens.transfer(&tx.token_symbol, &tx.from, &tx.to, tx.amount)?;
            Ok(())
        }
        TxKind::StakeDeposit => {
            tokens.transfer(&tx.token_symbol, &tx.from, STAKING_CONTRACT, tx.amount)?;
            if let Err(e) = stakes.add(&tx.from, tx.amount) {
                // Undo the custody transfer so the failed deposit is invisible.
                let _ = tokens.transfer(&tx.token_symbol, STAKING_CONTRACT, &tx.from, tx.amount);
                return Err(e.into());
            }
            Ok(())
        }
        TxKind::StakeWithdraw => {
            let have = stakes.get(&tx.from);
            if have < tx.amount {
                return Err(StakeError::InsufficientStake { have, need: tx.amount }.into());
            }
            tokens.transfer(&tx.token_symbol, STAKING_CONTRACT, &tx.from, tx.amount)?;
            if let Err(e) = stakes.remove(&tx.from, tx.amount) {
                let _ = tokens.transfer(&tx.token_symbol, &tx.from, STAKING_CONTRACT, tx.amount);
                return Err(e.into());
            }
            Ok(())
        }
        TxKind::TokenMint => {
            require_mint_authority(tx, tokens, "mint")?;
            tokens.mint(&tx.token_symbol, &tx.to, tx.amount)?;
            Ok(())
        }
        TxKind::TokenBurn => {
            require_mint_authority(tx, tokens, "burn")?;
            tokens.burn(&tx.token_symbol, &tx.from, tx.amount)?;
            Ok(())
        }
    }
}

fn require_mint_authority(
    tx: &Transaction,
    tokens: &TokenLedger,
    verb: &'static str,
) -> Result<(), ExecError> {
    if tx.from == SYSTEM_ADDRESS {
        return Ok(());
    }
    if tokens.minter_of(&tx.token_symbol).as_deref() == Some(tx.from.as_str()) {
        return Ok(());
    }
    Err(ExecError::NotAuthorized(tx.from.clone(), verb))
}
