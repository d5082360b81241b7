use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Graceful shutdown requested (SIGTERM, SIGINT)
    Graceful,
    /// Worker recycle requested (SIGUSR1 or the restart control endpoint)
    Restart,
    /// Forced shutdown (channel lost or drain exceeded)
    Force,
}

/// Manages graceful shutdown and worker-recycle signalling.
///
/// `Restart` is deliberately not latched: workers can be recycled any number
/// of times over the life of the process. Only `Graceful`/`Force` flip the
/// one-way shutdown flag.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    grace: Duration,
}

impl GracefulShutdown {
    /// Create a new manager with the default 30-second drain grace.
    pub fn new() -> Self {
        Self::with_grace(Duration::from_secs(30))
    }

    /// Create a new manager with a custom drain grace.
    pub fn with_grace(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            grace,
        }
    }

    /// How long workers may spend draining in-flight connections.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Get a receiver for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Broadcast a shutdown or restart signal.
    pub fn trigger(&self, reason: ShutdownReason) {
        match reason {
            ShutdownReason::Restart => {
                tracing::info!("worker recycle triggered");
                let _ = self.shutdown_tx.send(reason);
            }
            ShutdownReason::Graceful | ShutdownReason::Force => {
                if self
                    .shutdown_initiated
                    .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    tracing::info!("shutdown triggered: {:?}", reason);
                    let _ = self.shutdown_tx.send(reason);
                } else {
                    tracing::warn!("shutdown already initiated, ignoring {:?}", reason);
                }
            }
        }
    }

    /// Listen for OS signals until a terminal one arrives. SIGUSR1 recycles
    /// workers and keeps listening; SIGTERM/SIGINT end the loop.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!(
            "signal handler started; SIGTERM/SIGINT stop the gateway, SIGUSR1 recycles workers"
        );

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal as unix_signal};
            let mut sigterm = unix_signal(SignalKind::terminate())?;
            let mut sigusr1 = unix_signal(SignalKind::user_defined1())?;

            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        tracing::info!("received SIGINT, initiating graceful shutdown");
                        self.trigger(ShutdownReason::Graceful);
                        break;
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("received SIGTERM, initiating graceful shutdown");
                        self.trigger(ShutdownReason::Graceful);
                        break;
                    }
                    _ = sigusr1.recv() => {
                        tracing::info!("received SIGUSR1, recycling workers");
                        self.trigger(ShutdownReason::Restart);
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
            self.trigger(ShutdownReason::Graceful);
        }

        tracing::info!("signal handler finished");
        Ok(())
    }

    /// Create a token used by workers and the main loop to wait for a stop.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A token that resolves once the process is actually stopping.
///
/// `Restart` signals are skipped: recycling is the supervisor's business,
/// token holders only care about the end of the process.
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Wait until a terminal shutdown signal arrives.
    pub async fn wait_for_stop(&mut self) -> ShutdownReason {
        loop {
            match self.receiver.recv().await {
                Ok(ShutdownReason::Restart) => continue,
                Ok(reason) => return reason,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed messages; trust the flag.
                    if self.is_shutdown_initiated() {
                        return ShutdownReason::Force;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return ShutdownReason::Force,
            }
        }
    }
}
