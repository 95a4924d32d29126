//! Graceful shutdown signal handling.
//!
//! Waits for SIGINT or SIGTERM and fans the shutdown out to every service
//! loop over a broadcast channel.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

pub struct Handlers;

impl Handlers {
    /// Block until a termination signal arrives, then notify all services.
    pub async fn wait_for_shutdown(shutdown: broadcast::Sender<()>) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal as unix_signal};
            match unix_signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    let _ = signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
        }
        Self::announce(&shutdown);
    }

    fn announce(shutdown: &broadcast::Sender<()>) {
        info!("shutdown signal received");
        let _ = shutdown.send(());
    }
}
