//! Ledger capability surface for external modules.
//!
//! Exchange, escrow, bridge and wallet components depend on this trait
//! only, never on the chain store itself. Every mutation goes through the
//! chain's exclusive writer.

use async_trait::async_trait;

use crate::chain::ChainError;
use crate::events::{EventFilter, EventStream};
use crate::node::AppState;
use crate::token::TokenDescriptor;
use crate::transaction::Transaction;

#[async_trait]
pub trait LedgerOps: Send + Sync {
    /// Validate and queue a transaction; returns its id.
    async fn submit_transaction(&self, tx: Transaction) -> Result<String, ChainError>;

    async fn balance(&self, address: &str, token_symbol: &str) -> u64;

    async fn stake(&self, address: &str) -> u64;

    async fn register_token(&self, descriptor: TokenDescriptor) -> Result<(), ChainError>;

    /// Privileged mint outside the transaction flow.
    async fn token_mint(&self, symbol: &str, to: &str, amount: u64) -> Result<(), ChainError>;

    /// Privileged burn outside the transaction flow.
    async fn token_burn(&self, symbol: &str, from: &str, amount: u64) -> Result<(), ChainError>;

    /// Privileged programmatic transfer, e.g. an escrow locking funds into
    /// a custodial address.
    async fn transfer(&self, from: &str, to: &str, symbol: &str, amount: u64) -> Result<(), ChainError>;

    fn subscribe_events(&self, filter: EventFilter) -> EventStream;
}

#[async_trait]
impl LedgerOps for AppState {
    async fn submit_transaction(&self, tx: Transaction) -> Result<String, ChainError> {
        let id = self.chain.write().await.submit_local_transaction(tx)?;
        Ok(id)
    }

    async fn balance(&self, address: &str, token_symbol: &str) -> u64 {
        self.tokens.balance_of(token_symbol, address)
    }

    async fn stake(&self, address: &str) -> u64 {
        self.stakes.get(address)
    }

    async fn register_token(&self, descriptor: TokenDescriptor) -> Result<(), ChainError> {
        self.chain.write().await.register_token(descriptor)?;
        Ok(())
    }

    async fn token_mint(&self, symbol: &str, to: &str, amount: u64) -> Result<(), ChainError> {
        self.chain.write().await.admin_mint(symbol, to, amount).await
    }

    async fn token_burn(&self, symbol: &str, from: &str, amount: u64) -> Result<(), ChainError> {
        self.chain.write().await.admin_burn(symbol, from, amount).await
    }

    async fn transfer(&self, from: &str, to: &str, symbol: &str, amount: u64) -> Result<(), ChainError> {
        self.chain.write().await.admin_transfer(symbol, from, to, amount).await
    }

    fn subscribe_events(&self, filter: EventFilter) -> EventStream {
        self.events.subscribe(filter)
    }
}
