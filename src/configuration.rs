//! Configuration and CLI parsing.
//!
//! Settings merge with priority CLI > environment > config file > defaults.
//! The config file is YAML when the `serde_yaml` feature is enabled
//! (default), JSON otherwise.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration file {path}: {reason}")]
    FileLoad { path: String, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Command-line arguments for the node.
#[derive(Parser, Debug, Default)]
#[command(name = "blackhole-node", about = "Blackhole proof-of-stake chain node")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Gossip bind address, e.g. 0.0.0.0:7001
    #[arg(long)]
    pub bind: Option<String>,
    /// HTTP API bind address, e.g. 127.0.0.1:8080
    #[arg(long)]
    pub api: Option<String>,
    /// Data directory for persisted state
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// This node's validator identity
    #[arg(long)]
    pub validator: Option<String>,
    /// Bootstrap peer address; may be given multiple times
    #[arg(long = "peer")]
    pub peers: Vec<String>,
    /// Disable block production on this node
    #[arg(long)]
    pub no_mine: bool,
    /// Print version and exit
    #[arg(long)]
    pub version: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub chain: ChainConfig,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the gossip listener binds.
    pub bind_addr: String,
    /// Maximum simultaneously connected peers.
    pub max_peers: usize,
    /// Peers dialed at startup.
    pub bootstrap_peers: Vec<String>,
    /// Seconds between sync-ahead requests.
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Seconds between block production slots.
    pub block_interval_secs: u64,
    /// Transactions per block, reward excluded.
    pub max_block_txs: usize,
    /// Mempool capacity.
    pub mempool_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Validator identity of this node.
    pub validator_id: String,
    /// Whether this node runs the miner loop.
    pub mine: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory. Empty disables persistence.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7001".into(),
            max_peers: 50,
            bootstrap_peers: Vec::new(),
            sync_interval_secs: 5,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_interval_secs: 6,
            max_block_txs: 100,
            mempool_capacity: 1024,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            validator_id: "genesis-validator".into(),
            mine: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: "./data".into() }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            enabled: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            chain: ChainConfig::default(),
            node: NodeConfig::default(),
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Assemble the effective configuration from all sources.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse_file(&content).map_err(|reason| ConfigError::FileLoad {
            path: path.display().to_string(),
            reason,
        })
    }

    #[cfg(feature = "serde_yaml")]
    fn parse_file(content: &str) -> Result<Self, String> {
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    #[cfg(not(feature = "serde_yaml"))]
    fn parse_file(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("BHX_BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("BHX_API_ADDR") {
            self.api.bind_addr = v;
        }
        if let Ok(v) = std::env::var("BHX_DB_PATH") {
            self.storage.path = v;
        }
        if let Ok(v) = std::env::var("BHX_VALIDATOR_ID") {
            self.node.validator_id = v;
        }
        if let Ok(v) = std::env::var("BHX_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.network.bind_addr = bind.clone();
        }
        if let Some(api) = &cli.api {
            self.api.bind_addr = api.clone();
        }
        if let Some(db) = &cli.db {
            self.storage.path = db.display().to_string();
        }
        if let Some(validator) = &cli.validator {
            self.node.validator_id = validator.clone();
        }
        if !cli.peers.is_empty() {
            self.network.bootstrap_peers = cli.peers.clone();
        }
        if cli.no_mine {
            self.node.mine = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.bind_addr.is_empty() {
            return Err(ConfigError::Invalid("network.bind_addr must be set".into()));
        }
        if self.node.validator_id.is_empty() {
            return Err(ConfigError::Invalid("node.validator_id must be set".into()));
        }
        if self.chain.block_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "chain.block_interval_secs must be positive".into(),
            ));
        }
        if self.chain.max_block_txs == 0 {
            return Err(ConfigError::Invalid("chain.max_block_txs must be positive".into()));
        }
        if self.chain.mempool_capacity == 0 {
            return Err(ConfigError::Invalid(
                "chain.mempool_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn cli_overrides_take_priority() {
        let cli = Cli {
            bind: Some("127.0.0.1:9000".into()),
            validator: Some("v-test".into()),
            peers: vec!["10.0.0.1:7001".into()],
            no_mine: true,
            ..Default::default()
        };
        let mut config = Config::default();
        config.apply_cli(&cli);
        assert_eq!(config.network.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.node.validator_id, "v-test");
        assert_eq!(config.network.bootstrap_peers, vec!["10.0.0.1:7001".to_string()]);
        assert!(!config.node.mine);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = Config::default();
        config.chain.block_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let parsed = Config::parse_file("network:\n  bind_addr: \"0.0.0.0:7009\"\n");
        #[cfg(feature = "serde_yaml")]
        {
            let config = parsed.unwrap();
            assert_eq!(config.network.bind_addr, "0.0.0.0:7009");
            assert_eq!(config.chain.block_interval_secs, 6);
        }
        #[cfg(not(feature = "serde_yaml"))]
        let _ = parsed;
    }
}
