//! Application state and service wiring.
//!
//! `AppState` holds every shared subsystem behind its own lock and is the
//! single place services are spawned from. Shutdown fans out over a
//! broadcast channel; each service loop selects on it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::api;
use crate::chain::{ChainStore, Outbound};
use crate::configuration::Config;
use crate::events::EventBus;
use crate::handlers::Handlers;
use crate::miner::Miner;
use crate::network::Network;
use crate::slashing::SlashingManager;
use crate::stake::StakeLedger;
use crate::storage::KvStore;
use crate::token::TokenLedger;
use crate::tracers::{TraceEvent, Tracer};

/// Shared handle to every node subsystem.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub chain: Arc<RwLock<ChainStore>>,
    pub tokens: Arc<TokenLedger>,
    pub stakes: Arc<StakeLedger>,
    pub slashing: Arc<AsyncMutex<SlashingManager>>,
    pub events: EventBus,
    pub outbox: mpsc::UnboundedSender<Outbound>,
    pub shutdown: broadcast::Sender<()>,
    pub tracer: Tracer,
}

impl AppState {
    /// Open storage, build the ledgers and bootstrap the chain. Fails hard
    /// on an unusable data directory.
    pub async fn init(config: Config) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<Outbound>)> {
        let tokens = Arc::new(TokenLedger::new());
        let stakes = Arc::new(StakeLedger::new());
        let events = EventBus::default();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

        let storage = if config.storage.path.is_empty() {
            None
        } else {
            let kv = KvStore::open(&config.storage.path)
                .await
                .with_context(|| format!("opening data directory {}", config.storage.path))?;
            Some(Arc::new(kv))
        };

        let chain = ChainStore::bootstrap(
            tokens.clone(),
            stakes.clone(),
            events.clone(),
            outbox_tx.clone(),
            storage,
            config.chain.mempool_capacity,
        )
        .await
        .context("bootstrapping chain state")?;

        let (shutdown, _) = broadcast::channel(8);
        let tracer = Tracer::logging();
        tracer.trace(TraceEvent::Startup(config.node.validator_id.clone()));

        let state = Self {
            config: Arc::new(config),
            chain: Arc::new(RwLock::new(chain)),
            tokens,
            stakes,
            slashing: Arc::new(AsyncMutex::new(SlashingManager::new())),
            events,
            outbox: outbox_tx,
            shutdown,
            tracer,
        };
        Ok((state, outbox_rx))
    }

    /// Bind the listeners and spawn every service task. Port binding
    /// failures surface here so startup can exit non-zero.
    pub async fn spawn_services(
        &self,
        outbox_rx: mpsc::UnboundedReceiver<Outbound>,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        let network = Arc::new(Network::new(
            self.config.network.clone(),
            self.chain.clone(),
        ));

        let gossip_listener = TcpListener::bind(&self.config.network.bind_addr)
            .await
            .with_context(|| format!("binding gossip address {}", self.config.network.bind_addr))?;
        handles.push(tokio::spawn(
            network.clone().serve(gossip_listener, self.shutdown.subscribe()),
        ));

        handles.push(tokio::spawn(
            network.clone().run_outbox(outbox_rx, self.shutdown.subscribe()),
        ));

        handles.push(tokio::spawn(network.clone().run_sync_timer(
            Duration::from_secs(self.config.network.sync_interval_secs),
            self.shutdown.subscribe(),
        )));

        if self.config.node.mine {
            let miner = Miner::new(
                self.chain.clone(),
                self.stakes.clone(),
                self.outbox.clone(),
                self.config.node.validator_id.clone(),
                Duration::from_secs(self.config.chain.block_interval_secs),
                self.config.chain.max_block_txs,
            );
            handles.push(tokio::spawn(miner.run(self.shutdown.subscribe())));
        }

        if self.config.api.enabled {
            let api_listener = TcpListener::bind(&self.config.api.bind_addr)
                .await
                .with_context(|| format!("binding API address {}", self.config.api.bind_addr))?;
            info!(addr = %self.config.api.bind_addr, "HTTP API listening");
            handles.push(tokio::spawn(api::serve(
                api_listener,
                self.clone(),
                self.shutdown.subscribe(),
            )));
        }

        Ok(handles)
    }

    /// Run until a termination signal, then wait for services to drain.
    pub async fn run(self, handles: Vec<JoinHandle<()>>) {
        Handlers::wait_for_shutdown(self.shutdown.clone()).await;
        self.tracer
            .trace(TraceEvent::Shutdown("termination signal".into()));
        let _ = futures::future::join_all(handles).await;
        info!("node stopped");
    }
}
