//! The registry-owner actor.
//!
//! Exactly one task runs [`RegistryOwner::run`]. It is the single writer of
//! registry state: workers relay registrations and restart requests into its
//! mailbox, the health checker reports probe outcomes, and every mutation is
//! followed by persist + rebroadcast so the on-disk file and the worker
//! replicas trail the owner by at most one message.
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    adapters::store::RegistryStore,
    core::{
        registry::{ProbeOutcome, Registry, RegistryResult, ServiceRegistration},
        snapshot::RegistrySnapshot,
    },
    metrics,
};

/// Commands accepted by the registry owner.
#[derive(Debug)]
pub enum OwnerCommand {
    /// A worker relays a service registration and waits for the ack.
    Register {
        registration: ServiceRegistration,
        ack: oneshot::Sender<RegistryResult<()>>,
    },
    /// A worker relays a restart request; the supervisor recycles workers.
    Restart { ack: oneshot::Sender<()> },
    /// The health checker reports a finished probe cycle.
    ProbeReport { outcomes: Vec<ProbeOutcome> },
}

/// Single-writer owner of the [`Registry`].
pub struct RegistryOwner {
    registry: Registry,
    store: RegistryStore,
    commands: mpsc::Receiver<OwnerCommand>,
    snapshots: watch::Sender<Arc<RegistrySnapshot>>,
    restarts: mpsc::Sender<()>,
    strikes: u32,
}

impl RegistryOwner {
    pub fn new(
        registry: Registry,
        store: RegistryStore,
        commands: mpsc::Receiver<OwnerCommand>,
        snapshots: watch::Sender<Arc<RegistrySnapshot>>,
        restarts: mpsc::Sender<()>,
        strikes: u32,
    ) -> Self {
        Self {
            registry,
            store,
            commands,
            snapshots,
            restarts,
            strikes,
        }
    }

    /// Run the owner loop until every command sender is gone.
    pub async fn run(mut self) {
        tracing::info!(
            routes = self.registry.len(),
            state_path = %self.store.path().display(),
            "registry owner started"
        );

        while let Some(command) = self.commands.recv().await {
            match command {
                OwnerCommand::Register { registration, ack } => {
                    let result = self.registry.register(&registration);
                    match &result {
                        Ok(()) => {
                            tracing::info!(
                                service = %registration.name,
                                instance = %registration.url,
                                routes = ?registration.routes,
                                "service registered"
                            );
                            self.persist_and_broadcast(true);
                        }
                        Err(e) => {
                            tracing::warn!(
                                instance = %registration.url,
                                "rejected registration: {e}"
                            );
                        }
                    }
                    let _ = ack.send(result);
                }
                OwnerCommand::ProbeReport { outcomes } => {
                    let membership_changed = self.registry.apply_probes(&outcomes, self.strikes);
                    // The persisted file carries no metrics, so a metrics-only
                    // cycle skips the disk; workers still get fresh latency.
                    self.persist_and_broadcast(membership_changed);
                }
                OwnerCommand::Restart { ack } => {
                    tracing::info!("restart requested; signalling worker supervisor");
                    if self.restarts.send(()).await.is_err() {
                        tracing::warn!("worker supervisor is gone; restart request dropped");
                    }
                    let _ = ack.send(());
                }
            }
        }

        tracing::info!("registry owner shutting down");
    }

    fn persist_and_broadcast(&mut self, persist: bool) {
        let snapshot = Arc::new(self.registry.snapshot());

        if persist {
            if let Err(e) = self.store.save(&snapshot) {
                // Not fatal: the next mutation persists again.
                tracing::warn!(
                    state_path = %self.store.path().display(),
                    "failed to persist registry state: {e}"
                );
            }
        }

        let target_count: usize = snapshot.entries().map(|e| e.targets.len()).sum();
        metrics::set_registered_targets(target_count);

        // Send succeeds even with zero live receivers; new workers pick up
        // the latest value on subscribe.
        let _ = self.snapshots.send(snapshot);
    }
}
