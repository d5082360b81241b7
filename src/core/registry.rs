//! The service registry owned by the registry-owner task.
//!
//! A [`Registry`] maps route prefixes to [`RouteEntry`] groups. Each entry
//! carries the set of instance URLs backing one logical service together with
//! per-instance health metrics. All mutation goes through the owner task;
//! everything else in the gateway only ever sees immutable
//! [`RegistrySnapshot`](super::snapshot::RegistrySnapshot) projections.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::snapshot::{RegistrySnapshot, SnapshotEntry};

/// One service instance advertising itself under one or more path prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub name: String,
    pub url: String,
    pub routes: Vec<String>,
}

/// Errors rejected at registration time.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("invalid instance url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("registration must advertise at least one route prefix")]
    EmptyRoutes,

    #[error("route prefix '{0}' must start with '/'")]
    BadPrefix(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Health status of a single target instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Healthy,
    Failing,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Healthy => write!(f, "healthy"),
            TargetStatus::Failing => write!(f, "failing"),
        }
    }
}

/// Per-target health metrics, rebuilt from scratch on every restart.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetMetric {
    pub status: TargetStatus,
    pub latency_ms: u64,
    pub fail_count: u32,
    pub last_error: Option<String>,
}

impl Default for TargetMetric {
    fn default() -> Self {
        Self {
            status: TargetStatus::Healthy,
            latency_ms: 0,
            fail_count: 0,
            last_error: None,
        }
    }
}

/// One route group: every instance URL registered under a single prefix.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub prefix: String,
    pub service_name: String,
    /// Instance URLs in registration order, set semantics.
    pub targets: Vec<String>,
    pub metrics: HashMap<String, TargetMetric>,
}

impl RouteEntry {
    fn new(prefix: String, service_name: String) -> Self {
        Self {
            prefix,
            service_name,
            targets: Vec::new(),
            metrics: HashMap::new(),
        }
    }

    fn remove_target(&mut self, url: &str) {
        self.targets.retain(|t| t != url);
        self.metrics.remove(url);
    }
}

/// Outcome of one liveness probe against one (prefix, target) pair.
/// `Ok` carries the observed latency in milliseconds.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub prefix: String,
    pub target: String,
    pub result: Result<u64, String>,
}

/// The mutable registry. Owned exclusively by the registry-owner task.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<String, RouteEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted state. Metrics are not trusted
    /// across restarts: every target starts out healthy with zeroed counters.
    pub fn restore<I>(persisted: I) -> Self
    where
        I: IntoIterator<Item = (String, String, Vec<String>)>,
    {
        let mut registry = Self::new();
        for (prefix, name, targets) in persisted {
            let mut entry = RouteEntry::new(prefix.clone(), name);
            for target in targets {
                if entry.targets.contains(&target) {
                    continue;
                }
                entry.metrics.insert(target.clone(), TargetMetric::default());
                entry.targets.push(target);
            }
            if !entry.targets.is_empty() {
                registry.entries.insert(prefix, entry);
            }
        }
        registry
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate route entries in prefix order.
    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    /// Register one instance under the prefixes it advertises.
    ///
    /// Invariant: an instance URL belongs to at most one route entry per
    /// prefix set. The URL is first removed from every entry that currently
    /// lists it (entries left empty are dropped), then added under each
    /// advertised prefix. The display name follows the most recent
    /// registrant.
    pub fn register(&mut self, registration: &ServiceRegistration) -> RegistryResult<()> {
        let parsed = Url::parse(&registration.url).map_err(|e| RegistryError::InvalidUrl {
            url: registration.url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RegistryError::InvalidUrl {
                url: registration.url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        if registration.routes.is_empty() {
            return Err(RegistryError::EmptyRoutes);
        }
        for prefix in &registration.routes {
            if !prefix.starts_with('/') {
                return Err(RegistryError::BadPrefix(prefix.clone()));
            }
        }

        self.remove_target_everywhere(&registration.url);

        for prefix in &registration.routes {
            let entry = self
                .entries
                .entry(prefix.clone())
                .or_insert_with(|| RouteEntry::new(prefix.clone(), registration.name.clone()));
            // Most-recent registrant wins the display name.
            entry.service_name = registration.name.clone();
            if !entry.targets.contains(&registration.url) {
                entry.targets.push(registration.url.clone());
            }
            entry
                .metrics
                .insert(registration.url.clone(), TargetMetric::default());
        }

        Ok(())
    }

    fn remove_target_everywhere(&mut self, url: &str) {
        for entry in self.entries.values_mut() {
            entry.remove_target(url);
        }
        self.entries.retain(|_, entry| !entry.targets.is_empty());
    }

    /// Apply a batch of probe outcomes. A successful probe resets the target
    /// to healthy and records its latency; a failure adds one strike. A
    /// target reaching `strikes` consecutive failures is removed outright.
    ///
    /// Returns true when route membership changed (a target or entry was
    /// removed), which is the signal that persisted state is stale.
    pub fn apply_probes(&mut self, outcomes: &[ProbeOutcome], strikes: u32) -> bool {
        let mut membership_changed = false;

        for outcome in outcomes {
            let Some(entry) = self.entries.get_mut(&outcome.prefix) else {
                continue;
            };
            let Some(metric) = entry.metrics.get_mut(&outcome.target) else {
                continue;
            };

            match &outcome.result {
                Ok(latency_ms) => {
                    metric.status = TargetStatus::Healthy;
                    metric.latency_ms = *latency_ms;
                    metric.fail_count = 0;
                    metric.last_error = None;
                }
                Err(reason) => {
                    metric.fail_count += 1;
                    metric.status = TargetStatus::Failing;
                    metric.last_error = Some(reason.clone());
                    tracing::info!(
                        target_url = %outcome.target,
                        prefix = %outcome.prefix,
                        failures = metric.fail_count,
                        threshold = strikes,
                        "health probe failed: {reason}"
                    );
                    if metric.fail_count >= strikes {
                        tracing::warn!(
                            target_url = %outcome.target,
                            prefix = %outcome.prefix,
                            "removing target after {strikes} consecutive probe failures"
                        );
                        entry.remove_target(&outcome.target);
                        membership_changed = true;
                    }
                }
            }
        }

        if membership_changed {
            self.entries.retain(|_, entry| !entry.targets.is_empty());
        }
        membership_changed
    }

    /// Project the registry into an immutable snapshot for replication and
    /// persistence.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self
            .entries
            .values()
            .map(|entry| {
                SnapshotEntry::new(
                    entry.prefix.clone(),
                    entry.service_name.clone(),
                    entry.targets.clone(),
                    entry.metrics.clone(),
                )
            })
            .collect();
        RegistrySnapshot::new(entries)
    }
}
