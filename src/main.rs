//! Binary entrypoint for the Blackhole node.
//!
//! Parses the CLI, assembles the configuration, initializes state and runs
//! every service on the Tokio runtime until signaled. Startup failures
//! (unusable data directory, taken ports, invalid configuration) exit
//! non-zero.

use clap::Parser;
use tracing::error;

use blackhole_node::configuration::{Cli, Config};
use blackhole_node::node::AppState;
use blackhole_node::tracers;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.version {
        println!("blackhole-node v{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    tracers::init_tracing(&config.logging.level);

    let (state, outbox_rx) = match AppState::init(config).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "node initialization failed");
            std::process::exit(1);
        }
    };

    let handles = match state.spawn_services(outbox_rx).await {
        Ok(handles) => handles,
        Err(e) => {
            error!(error = %e, "service startup failed");
            std::process::exit(1);
        }
    };

    state.run(handles).await;
}
