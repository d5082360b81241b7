use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::{
    sync::{mpsc, watch},
    time::sleep,
};

use crate::{
    config::HealthConfig,
    core::{
        owner::OwnerCommand,
        registry::ProbeOutcome,
        snapshot::RegistrySnapshot,
    },
    metrics,
    ports::http_client::HttpClient,
};

/// Health checker adapter: the gateway's failure-detection loop.
///
/// Runs independently of request handling. Every cycle it reads the latest
/// snapshot off the replication channel, probes each (prefix, target) pair
/// concurrently with a per-probe timeout, and reports the outcomes to the
/// registry owner, which applies strikes and evictions.
pub struct HealthChecker {
    snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
    commands: mpsc::Sender<OwnerCommand>,
    http_client: Arc<dyn HttpClient>,
    config: HealthConfig,
}

impl HealthChecker {
    pub fn new(
        snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
        commands: mpsc::Sender<OwnerCommand>,
        http_client: Arc<dyn HttpClient>,
        config: HealthConfig,
    ) -> Self {
        Self {
            snapshots,
            commands,
            http_client,
            config,
        }
    }

    /// Run the probe loop until the owner goes away.
    pub async fn run(self) {
        if !self.config.enabled {
            tracing::info!("health checking is disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_secs);
        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            path = %self.config.path,
            strikes = self.config.strikes,
            "health checker started"
        );

        loop {
            // Sleep first so freshly registered services get a grace period
            // before their first probe.
            sleep(interval).await;

            let snapshot = self.snapshots.borrow().clone();
            if snapshot.is_empty() {
                continue;
            }

            let outcomes = self.run_cycle(&snapshot).await;
            if outcomes.is_empty() {
                continue;
            }
            if self
                .commands
                .send(OwnerCommand::ProbeReport { outcomes })
                .await
                .is_err()
            {
                tracing::info!("registry owner is gone; stopping health checker");
                return;
            }
        }
    }

    /// Probe every registered (prefix, target) pair concurrently.
    ///
    /// Each probe carries its own timeout, so one unreachable instance cannot
    /// delay detection of the others.
    pub async fn run_cycle(&self, snapshot: &RegistrySnapshot) -> Vec<ProbeOutcome> {
        let deadline = Duration::from_secs(self.config.timeout_secs);

        let probes: Vec<_> = snapshot
            .entries()
            .flat_map(|entry| {
                let prefix = entry.prefix.clone();
                entry.targets.iter().map(move |target| {
                    let prefix = prefix.clone();
                    let target = target.clone();
                    let url = format!("{target}{}", self.config.path);
                    let client = self.http_client.clone();
                    async move {
                        let result = client
                            .probe(&url, deadline)
                            .await
                            .map(|latency| latency.as_millis() as u64)
                            .map_err(|e| e.to_string());
                        metrics::set_target_health(&target, result.is_ok());
                        ProbeOutcome {
                            prefix,
                            target,
                            result,
                        }
                    }
                })
            })
            .collect();

        tracing::debug!(probes = probes.len(), "running health cycle");
        join_all(probes).await
    }
}
