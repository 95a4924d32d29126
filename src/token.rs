//! Multi-token ledger.
//!
//! Each registered token keeps its own balance and allowance maps; the
//! native coin is just another entry in the registry. All arithmetic is
//! checked, and `sum(balances) == total_supply` holds after every
//! successful operation.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by token operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token {0} is not registered")]
    TokenNotFound(String),
    #[error("token {0} is already registered")]
    AlreadyRegistered(String),
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },
    #[error("mint would overflow total supply")]
    SupplyOverflow,
    #[error("credit would overflow recipient balance")]
    BalanceOverflow,
}

/// Static description of a token, supplied at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Address allowed to mint and burn besides the chain itself.
    pub minter: Option<String>,
}

/// A single token's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub minter: Option<String>,
    pub total_supply: u64,
    /// address -> balance
    pub balances: HashMap<String, u64>,
    /// owner -> spender -> approved amount
    pub allowances: HashMap<String, HashMap<String, u64>>,
}

impl Token {
    pub fn new(desc: TokenDescriptor) -> Self {
        Self {
            name: desc.name,
            symbol: desc.symbol,
            decimals: desc.decimals,
            minter: desc.minter,
            total_supply: 0,
            balances: HashMap::new(),
            allowances: HashMap::new(),
        }
    }

    pub fn balance_of(&self, addr: &str) -> u64 {
        self.balances.get(addr).copied().unwrap_or(0)
    }

    fn mint(&mut self, to: &str, amount: u64) -> Result<(), TokenError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::SupplyOverflow)?;
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(TokenError::BalanceOverflow)?;
        self.total_supply = supply;
        self.balances.insert(to.to_string(), balance);
        Ok(())
    }

    fn burn(&mut self, from: &str, amount: u64) -> Result<(), TokenError> {
        let have = self.balance_of(from);
        if have < amount {
            return Err(TokenError::InsufficientBalance { have, need: amount });
        }
        self.balances.insert(from.to_string(), have - amount);
        self.total_supply -= amount;
        Ok(())
    }

    fn transfer(&mut self, from: &str, to: &str, amount: u64) -> Result<(), TokenError> {
        let have = self.balance_of(from);
        if have < amount {
            return Err(TokenError::InsufficientBalance { have, need: amount });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(TokenError::BalanceOverflow)?;
        // Both sides validated; the two writes below cannot fail.
        self.balances.insert(from.to_string(), have - amount);
        self.balances.insert(to.to_string(), credited);
        Ok(())
    }

    fn approve(&mut self, owner: &str, spender: &str, amount: u64) {
        self.allowances
            .entry(owner.to_string())
            .or_default()
            .insert(spender.to_string(), amount);
    }

    pub fn allowance(&self, owner: &str, spender: &str) -> u64 {
        self.allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0)
    }
}

/// Registry of all tokens, keyed by symbol.
///
/// The registry carries its own reader-writer lock so standalone callers
/// (API queries, the slashing manager) can use it without going through the
/// chain store's lock.
#[derive(Debug, Default)]
pub struct TokenLedger {
    inner: RwLock<HashMap<String, Token>>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, desc: TokenDescriptor) -> Result<(), TokenError> {
        let mut tokens = self.inner.write().unwrap();
        if tokens.contains_key(&desc.symbol) {
            return Err(TokenError::AlreadyRegistered(desc.symbol));
        }
        tokens.insert(desc.symbol.clone(), Token::new(desc));
        Ok(())
    }

    pub fn exists(&self, symbol: &str) -> bool {
        self.inner.read().unwrap().contains_key(symbol)
    }

    pub fn minter_of(&self, symbol: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .get(symbol)
            .and_then(|t| t.minter.clone())
    }

    pub fn mint(&self, symbol: &str, to: &str, amount: u64) -> Result<(), TokenError> {
        self.with_token_mut(symbol, |t| t.mint(to, amount))
    }

    pub fn burn(&self, symbol: &str, from: &str, amount: u64) -> Result<(), TokenError> {
        self.with_token_mut(symbol, |t| t.burn(from, amount))
    }

    pub fn transfer(&self, symbol: &str, from: &str, to: &str, amount: u64) -> Result<(), TokenError> {
        self.with_token_mut(symbol, |t| t.transfer(from, to, amount))
    }

    pub fn approve(&self, symbol: &str, owner: &str, spender: &str, amount: u64) -> Result<(), TokenError> {
        self.with_token_mut(symbol, |t| {
            t.approve(owner, spender, amount);
            Ok(())
        })
    }

    pub fn allowance(&self, symbol: &str, owner: &str, spender: &str) -> u64 {
        self.inner
            .read()
            .unwrap()
            .get(symbol)
            .map(|t| t.allowance(owner, spender))
            .unwrap_or(0)
    }

    pub fn balance_of(&self, symbol: &str, addr: &str) -> u64 {
        self.inner
            .read()
            .unwrap()
            .get(symbol)
            .map(|t| t.balance_of(addr))
            .unwrap_or(0)
    }

    pub fn total_supply(&self, symbol: &str) -> u64 {
        self.inner
            .read()
            .unwrap()
            .get(symbol)
            .map(|t| t.total_supply)
            .unwrap_or(0)
    }

    /// All balances of every registered token, as owned copies.
    pub fn all_balances(&self) -> HashMap<String, HashMap<String, u64>> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .map(|(sym, t)| (sym.clone(), t.balances.clone()))
            .collect()
    }

    /// Owned copy of the full registry, used to snapshot state before a
    /// reorganization.
    pub fn snapshot(&self) -> HashMap<String, Token> {
        self.inner.read().unwrap().clone()
    }

    /// Replace the full registry in one step. The write lock makes the swap
    /// atomic with respect to every other token operation.
    pub fn restore(&self, snapshot: HashMap<String, Token>) {
        *self.inner.write().unwrap() = snapshot;
    }

    /// Overwrite one account's balance on a token, adjusting total supply by
    /// the difference. Used when rebuilding state from persisted accounts.
    pub fn restore_balance(&self, symbol: &str, addr: &str, balance: u64) -> Result<(), TokenError> {
        self.with_token_mut(symbol, |t| {
            let current = t.balance_of(addr);
            if balance >= current {
                t.total_supply = t
                    .total_supply
                    .checked_add(balance - current)
                    .ok_or(TokenError::SupplyOverflow)?;
            } else {
                t.total_supply -= current - balance;
            }
            t.balances.insert(addr.to_string(), balance);
            Ok(())
        })
    }

    fn with_token_mut<F>(&self, symbol: &str, f: F) -> Result<(), TokenError>
    where
        F: FnOnce(&mut Token) -> Result<(), TokenError>,
    {
        let mut tokens = self.inner.write().unwrap();
        let token = tokens
            .get_mut(symbol)
            .ok_or_else(|| TokenError::TokenNotFound(symbol.to_string()))?;
        f(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(symbol: &str) -> TokenLedger {
        let ledger = TokenLedger::new();
        ledger
            .register(TokenDescriptor {
                name: format!("{symbol} token"),
                symbol: symbol.to_string(),
                decimals: 8,
                minter: None,
            })
            .unwrap();
        ledger
    }

    #[test]
    fn mint_and_transfer_conserve_supply() {
        let ledger = ledger_with("TST");
        ledger.mint("TST", "alice", 1000).unwrap();
        ledger.transfer("TST", "alice", "bob", 400).unwrap();
        assert_eq!(ledger.balance_of("TST", "alice"), 600);
        assert_eq!(ledger.balance_of("TST", "bob"), 400);
        assert_eq!(ledger.total_supply("TST"), 1000);
    }

    #[test]
    fn transfer_insufficient_balance_leaves_state_unchanged() {
        let ledger = ledger_with("TST");
        ledger.mint("TST", "alice", 50).unwrap();
        let err = ledger.transfer("TST", "alice", "bob", 100).unwrap_err();
        assert_eq!(err, TokenError::InsufficientBalance { have: 50, need: 100 });
        assert_eq!(ledger.balance_of("TST", "alice"), 50);
        assert_eq!(ledger.balance_of("TST", "bob"), 0);
        assert_eq!(ledger.total_supply("TST"), 50);
    }

    #[test]
    fn self_transfer_is_a_no_op() {
        let ledger = ledger_with("TST");
        ledger.mint("TST", "alice", 100).unwrap();
        ledger.transfer("TST", "alice", "alice", 60).unwrap();
        assert_eq!(ledger.balance_of("TST", "alice"), 100);
        assert_eq!(ledger.total_supply("TST"), 100);
        // Still checked against the sender's balance.
        assert!(ledger.transfer("TST", "alice", "alice", 200).is_err());
    }

    #[test]
    fn burn_reduces_supply() {
        let ledger = ledger_with("TST");
        ledger.mint("TST", "alice", 100).unwrap();
        ledger.burn("TST", "alice", 30).unwrap();
        assert_eq!(ledger.balance_of("TST", "alice"), 70);
        assert_eq!(ledger.total_supply("TST"), 70);
    }

    #[test]
    fn mint_overflow_is_rejected() {
        let ledger = ledger_with("TST");
        ledger.mint("TST", "alice", u64::MAX).unwrap();
        assert_eq!(
            ledger.mint("TST", "bob", 1).unwrap_err(),
            TokenError::SupplyOverflow
        );
        assert_eq!(ledger.total_supply("TST"), u64::MAX);
        assert_eq!(ledger.balance_of("TST", "bob"), 0);
    }

    #[test]
    fn double_register_is_rejected() {
        let ledger = ledger_with("TST");
        let err = ledger
            .register(TokenDescriptor {
                name: "again".into(),
                symbol: "TST".into(),
                decimals: 2,
                minter: None,
            })
            .unwrap_err();
        assert_eq!(err, TokenError::AlreadyRegistered("TST".into()));
    }

    #[test]
    fn approve_and_allowance() {
        let ledger = ledger_with("TST");
        ledger.approve("TST", "alice", "bob", 250).unwrap();
        assert_eq!(ledger.allowance("TST", "alice", "bob"), 250);
        assert_eq!(ledger.allowance("TST", "alice", "carol"), 0);
    }

    #[test]
    fn unknown_token_operations_fail() {
        let ledger = TokenLedger::new();
        assert_eq!(
            ledger.mint("NOPE", "alice", 1).unwrap_err(),
            TokenError::TokenNotFound("NOPE".into())
        );
        assert_eq!(ledger.balance_of("NOPE", "alice"), 0);
    }

    #[test]
    fn snapshot_and_restore_roundtrip() {
        let ledger = ledger_with("TST");
        ledger.mint("TST", "alice", 500).unwrap();
        let snap = ledger.snapshot();
        ledger.mint("TST", "alice", 500).unwrap();
        assert_eq!(ledger.balance_of("TST", "alice"), 1000);
        ledger.restore(snap);
        assert_eq!(ledger.balance_of("TST", "alice"), 500);
        assert_eq!(ledger.total_supply("TST"), 500);
    }

    #[test]
    fn restore_balance_keeps_supply_equal_to_sum() {
        let ledger = ledger_with("TST");
        ledger.restore_balance("TST", "alice", 700).unwrap();
        ledger.restore_balance("TST", "bob", 300).unwrap();
        ledger.restore_balance("TST", "alice", 100).unwrap();
        assert_eq!(ledger.total_supply("TST"), 400);
    }
}
