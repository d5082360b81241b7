//! Worker supervision.
//!
//! The supervisor spawns the worker routers and is the gateway's only
//! self-healing mechanism: a worker that exits or panics outside shutdown is
//! respawned into the same slot. A restart request (control endpoint or
//! SIGUSR1) aborts and respawns the whole set, which is how configuration
//! and certificate changes take effect without a process restart.
use std::{collections::HashMap, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinSet,
};
use tokio_rustls::TlsAcceptor;

use crate::{
    adapters::http_handler::GatewayHandler,
    config::GatewayConfig,
    core::{owner::OwnerCommand, snapshot::RegistrySnapshot},
    metrics,
    ports::http_client::HttpClient,
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
    worker::Worker,
};

/// Everything needed to build one worker, shared by all spawns.
struct WorkerTemplate {
    listener: Arc<TcpListener>,
    tls: Option<TlsAcceptor>,
    http_client: Arc<dyn HttpClient>,
    commands: mpsc::Sender<OwnerCommand>,
    config: Arc<GatewayConfig>,
    snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
    shutdown: Arc<GracefulShutdown>,
}

impl WorkerTemplate {
    fn spawn(
        &self,
        workers: &mut JoinSet<usize>,
        slots: &mut HashMap<tokio::task::Id, usize>,
        id: usize,
    ) {
        let snapshot = Arc::new(ArcSwap::new(self.snapshots.borrow().clone()));
        let handler = Arc::new(GatewayHandler::new(
            snapshot,
            self.http_client.clone(),
            self.commands.clone(),
            self.config.clone(),
        ));
        let worker = Worker::new(
            id,
            self.listener.clone(),
            self.tls.clone(),
            handler,
            self.snapshots.clone(),
            self.shutdown.token(),
            Duration::from_secs(self.config.shutdown_grace_secs),
        );
        let handle = workers.spawn(worker.run());
        slots.insert(handle.id(), id);
    }

    async fn recycle(
        &self,
        workers: &mut JoinSet<usize>,
        slots: &mut HashMap<tokio::task::Id, usize>,
        count: usize,
    ) {
        workers.abort_all();
        while workers.join_next().await.is_some() {}
        slots.clear();
        for id in 0..count {
            self.spawn(workers, slots, id);
        }
    }
}

/// Supervising loop around the worker routers.
pub struct WorkerSupervisor {
    template: WorkerTemplate,
    restarts: mpsc::Receiver<()>,
}

impl WorkerSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: Arc<TcpListener>,
        tls: Option<TlsAcceptor>,
        http_client: Arc<dyn HttpClient>,
        commands: mpsc::Sender<OwnerCommand>,
        config: Arc<GatewayConfig>,
        snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
        restarts: mpsc::Receiver<()>,
        shutdown: Arc<GracefulShutdown>,
    ) -> Self {
        Self {
            template: WorkerTemplate {
                listener,
                tls,
                http_client,
                commands,
                config,
                snapshots,
                shutdown,
            },
            restarts,
        }
    }

    /// Run until a graceful shutdown completes.
    pub async fn run(self) {
        let Self {
            template,
            mut restarts,
        } = self;

        let count = template.config.worker_count();
        let mut workers: JoinSet<usize> = JoinSet::new();
        let mut slots: HashMap<tokio::task::Id, usize> = HashMap::new();
        for id in 0..count {
            template.spawn(&mut workers, &mut slots, id);
        }
        tracing::info!(workers = count, "worker supervisor started");

        let mut shutdown_rx = template.shutdown.subscribe();
        let mut stopping = false;
        let mut restarts_open = true;

        loop {
            tokio::select! {
                joined = workers.join_next_with_id(), if !workers.is_empty() => {
                    match joined {
                        Some(Ok((task_id, worker_id))) => {
                            slots.remove(&task_id);
                            if stopping {
                                if workers.is_empty() { break; }
                                continue;
                            }
                            // A worker leaving its accept loop outside
                            // shutdown is abnormal no matter how it exited.
                            tracing::warn!(worker = worker_id, "worker exited; respawning");
                            metrics::increment_worker_respawn();
                            template.spawn(&mut workers, &mut slots, worker_id);
                        }
                        Some(Err(join_error)) => {
                            let worker_id = slots.remove(&join_error.id());
                            if stopping {
                                if workers.is_empty() { break; }
                                continue;
                            }
                            if join_error.is_cancelled() {
                                continue;
                            }
                            let worker_id = worker_id.unwrap_or_default();
                            tracing::error!(
                                worker = worker_id,
                                "worker crashed: {join_error}; respawning"
                            );
                            metrics::increment_worker_respawn();
                            template.spawn(&mut workers, &mut slots, worker_id);
                        }
                        None => {
                            if stopping { break; }
                        }
                    }
                },
                restart = restarts.recv(), if !stopping && restarts_open => {
                    match restart {
                        Some(()) => {
                            tracing::info!("restart signal received; recycling all workers");
                            template.recycle(&mut workers, &mut slots, count).await;
                        }
                        // The owner is gone; workers keep serving their last
                        // snapshot until shutdown.
                        None => restarts_open = false,
                    }
                },
                reason = shutdown_rx.recv(), if !stopping => {
                    match reason {
                        Ok(ShutdownReason::Restart) => {
                            tracing::info!("restart requested via signal; recycling all workers");
                            template.recycle(&mut workers, &mut slots, count).await;
                        }
                        Ok(_) | Err(_) => {
                            // Workers see the same broadcast and drain on
                            // their own; just wait for them to finish.
                            stopping = true;
                            if workers.is_empty() { break; }
                        }
                    }
                },
            }
        }

        tracing::info!("worker supervisor stopped");
    }
}
