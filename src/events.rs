//! Chain event stream for external subscribers.
//!
//! The chain store publishes an event for every commit, balance change and
//! reorganization. Subscribers receive owned copies over a broadcast
//! channel; a lagging subscriber loses old events rather than blocking the
//! chain.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    BlockCommitted {
        index: u64,
        hash: String,
        validator: String,
        tx_count: usize,
    },
    BalanceChanged {
        address: String,
        token_symbol: String,
        balance: u64,
    },
    ChainReorganized {
        old_tip: String,
        new_tip: String,
        height: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    All,
    Blocks,
    Balances,
}

impl EventFilter {
    pub fn matches(&self, event: &ChainEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Blocks => matches!(
                event,
                ChainEvent::BlockCommitted { .. } | ChainEvent::ChainReorganized { .. }
            ),
            EventFilter::Balances => matches!(event, ChainEvent::BalanceChanged { .. }),
        }
    }
}

/// Publish side of the event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send an event to all current subscribers. Having none is fine.
    pub fn publish(&self, event: ChainEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            filter,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A filtered subscription handle.
pub struct EventStream {
    rx: broadcast::Receiver<ChainEvent>,
    filter: EventFilter,
}

impl EventStream {
    /// Next matching event, or `None` once the bus is gone. Events dropped
    /// because this subscriber lagged are skipped silently.
    pub async fn next(&mut self) -> Option<ChainEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
