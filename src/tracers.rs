//! Structured trace events and logging setup.
//!
//! Subsystems emit `TraceEvent`s through a clonable `Tracer`; handlers are
//! registered at startup. The default handler forwards everything to the
//! `tracing` macros, and tests can register capture handlers to observe
//! node behavior.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Events the node emits while running.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// Node startup with its validator identity.
    Startup(String),
    /// Node shutdown.
    Shutdown(String),
    /// Block committed at the given height.
    BlockCommitted(u64),
    /// Block produced by this node.
    BlockProduced(u64),
    /// Chain replaced up to the given height.
    Reorganized(u64),
    /// Transaction admitted to the mempool.
    TransactionAdmitted(String),
    /// Peer connected.
    PeerConnected(String),
    /// Peer disconnected or struck out.
    PeerDropped(String),
    /// Slashing event executed against a validator.
    SlashingExecuted(String),
    /// Anything else worth recording.
    Custom(String),
}

impl TraceEvent {
    pub fn description(&self) -> String {
        match self {
            TraceEvent::Startup(id) => format!("node started as {id}"),
            TraceEvent::Shutdown(msg) => format!("shutdown: {msg}"),
            TraceEvent::BlockCommitted(height) => format!("block committed at height {height}"),
            TraceEvent::BlockProduced(height) => format!("block produced at height {height}"),
            TraceEvent::Reorganized(height) => format!("chain reorganized to height {height}"),
            TraceEvent::TransactionAdmitted(id) => format!("transaction admitted: {id}"),
            TraceEvent::PeerConnected(addr) => format!("peer connected: {addr}"),
            TraceEvent::PeerDropped(addr) => format!("peer dropped: {addr}"),
            TraceEvent::SlashingExecuted(validator) => format!("slashing executed on {validator}"),
            TraceEvent::Custom(msg) => msg.clone(),
        }
    }
}

/// Clonable handler registry for trace events.
#[derive(Clone, Default)]
pub struct Tracer {
    handlers: Arc<Mutex<Vec<Box<dyn Fn(&TraceEvent) + Send + Sync>>>>,
}

impl Tracer {
    /// A tracer that forwards every event to the log.
    pub fn logging() -> Self {
        let tracer = Self::default();
        tracer.register(|event| match event {
            TraceEvent::Shutdown(_) | TraceEvent::PeerDropped(_) | TraceEvent::SlashingExecuted(_) => {
                warn!("{}", event.description())
            }
            _ => info!("{}", event.description()),
        });
        tracer
    }

    pub fn trace(&self, event: TraceEvent) {
        let handlers = self.handlers.lock().unwrap();
        for handler in handlers.iter() {
            handler(&event);
        }
    }

    pub fn register<F: Fn(&TraceEvent) + Send + Sync + 'static>(&self, handler: F) {
        self.handlers.lock().unwrap().push(Box::new(handler));
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the
/// configured level when set.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
