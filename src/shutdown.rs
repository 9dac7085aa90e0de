//! Graceful Shutdown Handling
//!
//! Coordinates shutdown across the accept loop, the connection tasks, and
//! the background sweeps. Components subscribe to a broadcast channel; the
//! coordinator waits for live sessions to drain before declaring completion.

use crate::session::ConnectionManager;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_complete: Arc<Notify>,
    /// How long to wait for live sessions before giving up
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            shutdown_complete: Arc::new(Notify::new()),
            timeout,
        }
    }

    /// Receiver for components that need to react to shutdown
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn completion_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_complete)
    }

    /// Trigger shutdown programmatically, without a signal
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }
    }

    /// Block until SIGTERM or SIGINT arrives, then broadcast shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Shutdown signal listener started");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Wait for admitted sessions to drain, then mark shutdown complete.
    ///
    /// The accept loop must already be stopped; this only watches the
    /// session registry empty out as connection tasks finish their
    /// teardown.
    pub async fn drain_sessions(&self, sessions: &ConnectionManager) -> Result<()> {
        let start = Instant::now();
        let mut last_count = sessions.active_count();
        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            last_count, self.timeout
        );

        while last_count > 0 && start.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(200)).await;

            let current = sessions.active_count();
            if current != last_count {
                debug!("Active sessions: {} -> {}", last_count, current);
                last_count = current;
            }
        }

        let remaining = sessions.active_count();
        if remaining == 0 {
            info!("All sessions closed gracefully in {:?}", start.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                start.elapsed(),
                remaining
            );
        }

        self.shutdown_complete.notify_waiters();
        Ok(())
    }

    /// Wait for `drain_sessions` to finish, with a small buffer past the
    /// drain timeout
    pub async fn wait_for_completion(&self) -> Result<()> {
        tokio::time::timeout(
            self.timeout + Duration::from_secs(5),
            self.shutdown_complete.notified(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Shutdown completion timeout"))?;

        Ok(())
    }
}
