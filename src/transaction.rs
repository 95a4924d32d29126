//! Transaction model and admission-time validation.
//!
//! A transaction's id is the SHA-256 of a canonical JSON pre-image with a
//! fixed field order; the id itself is excluded from the pre-image, and the
//! validator signature covers exactly the id bytes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing;
use crate::params::SYSTEM_ADDRESS;

/// Errors raised when a transaction is rejected before execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("missing required field: {0}")]
    EmptyField(&'static str),
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("token {0} is not registered")]
    UnknownToken(String),
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },
    #[error("insufficient stake: have {have}, need {need}")]
    InsufficientStake { have: u64, need: u64 },
    #[error("transaction {0} is already pending")]
    DuplicateId(String),
    #[error("mempool is full")]
    MempoolFull,
    #[error("transaction id does not match its contents")]
    IdMismatch,
    #[error("privileged transaction not accepted on this path")]
    PrivilegedOrigin,
}

/// The kinds of transaction the chain executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    TokenTransfer,
    StakeDeposit,
    StakeWithdraw,
    TokenMint,
    TokenBurn,
}

impl TxKind {
    /// Stable tag used in the id pre-image.
    pub fn tag(&self) -> &'static str {
        match self {
            TxKind::TokenTransfer => "token_transfer",
            TxKind::StakeDeposit => "stake_deposit",
            TxKind::StakeWithdraw => "stake_withdraw",
            TxKind::TokenMint => "token_mint",
            TxKind::TokenBurn => "token_burn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TxKind,
    pub from: String,
    pub to: String,
    pub token_symbol: String,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
    pub data: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// Canonical pre-image of the transaction id. Field order is fixed by the
/// struct declaration and must never change.
#[derive(Serialize)]
struct TxPreimage<'a> {
    r#type: &'static str,
    from: &'a str,
    to: &'a str,
    amount: u64,
    token_symbol: &'a str,
    data: &'a str,
    nonce: u64,
    timestamp: i64,
    public_key: String,
}

impl Transaction {
    /// Build a transaction stamped with the current wall clock.
    pub fn new(
        kind: TxKind,
        from: impl Into<String>,
        to: impl Into<String>,
        token_symbol: impl Into<String>,
        amount: u64,
        nonce: u64,
    ) -> Self {
        Self::new_at(kind, from, to, token_symbol, amount, nonce, Utc::now().timestamp())
    }

    /// Build a transaction with an explicit timestamp. Used for the genesis
    /// reward, whose id must be identical on every node.
    pub fn new_at(
        kind: TxKind,
        from: impl Into<String>,
        to: impl Into<String>,
        token_symbol: impl Into<String>,
        amount: u64,
        nonce: u64,
        timestamp: i64,
    ) -> Self {
        let mut tx = Self {
            id: String::new(),
            kind,
            from: from.into(),
            to: to.into(),
            token_symbol: token_symbol.into(),
            amount,
            fee: 0,
            nonce,
            data: String::new(),
            timestamp,
            signature: Vec::new(),
            public_key: Vec::new(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Recompute the id from the business fields.
    pub fn compute_id(&self) -> String {
        let preimage = TxPreimage {
            r#type: self.kind.tag(),
            from: &self.from,
            to: &self.to,
            amount: self.amount,
            token_symbol: &self.token_symbol,
            data: &self.data,
            nonce: self.nonce,
            timestamp: self.timestamp,
            public_key: hex::encode(&self.public_key),
        };
        // Struct fields serialize in declaration order, which keeps the
        // byte sequence stable for a given logical transaction.
        let bytes = serde_json::to_vec(&preimage).expect("preimage serialization cannot fail");
        hashing::sha256_hex(&bytes)
    }

    /// True for transactions issued by the chain itself (block rewards).
    pub fn is_system(&self) -> bool {
        self.from == SYSTEM_ADDRESS
    }

    /// Syntactic checks performed before a transaction may enter the
    /// mempool. Stateful checks (balances, registered tokens) live with the
    /// chain store, which owns that state.
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.id != self.compute_id() {
            return Err(TxError::IdMismatch);
        }
        if self.amount == 0 {
            return Err(TxError::ZeroAmount);
        }
        if self.token_symbol.is_empty() {
            return Err(TxError::EmptyField("token_symbol"));
        }
        match self.kind {
            TxKind::TokenMint => {
                if self.to.is_empty() {
                    return Err(TxError::EmptyField("to"));
                }
            }
            TxKind::TokenBurn | TxKind::StakeDeposit | TxKind::StakeWithdraw => {
                if self.from.is_empty() {
                    return Err(TxError::EmptyField("from"));
                }
            }
            TxKind::TokenTransfer => {
                if self.from.is_empty() {
                    return Err(TxError::EmptyField("from"));
                }
                if self.to.is_empty() {
                    return Err(TxError::EmptyField("to"));
                }
            }
        }
        Ok(())
    }
}
