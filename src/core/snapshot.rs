//! Immutable registry snapshots.
//!
//! A [`RegistrySnapshot`] is the read-side projection of the registry: workers
//! receive one over the replication channel and replace their local copy
//! wholesale, so a route lookup always observes one coherent generation. The
//! only mutable piece is each entry's round-robin cursor, which lives here as
//! an atomic because target selection happens on the request path.
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use super::registry::{TargetMetric, TargetStatus};

/// One route group as seen by the worker routers.
#[derive(Debug)]
pub struct SnapshotEntry {
    pub prefix: String,
    pub service_name: String,
    pub targets: Vec<String>,
    pub metrics: HashMap<String, TargetMetric>,
    cursor: AtomicU64,
}

impl SnapshotEntry {
    pub fn new(
        prefix: String,
        service_name: String,
        targets: Vec<String>,
        metrics: HashMap<String, TargetMetric>,
    ) -> Self {
        Self {
            prefix,
            service_name,
            targets,
            metrics,
            cursor: AtomicU64::new(0),
        }
    }

    /// Metric for a specific target, if tracked.
    pub fn metric(&self, target: &str) -> Option<&TargetMetric> {
        self.metrics.get(target)
    }

    fn is_failing(&self, target: &str) -> bool {
        self.metrics
            .get(target)
            .map(|m| m.status == TargetStatus::Failing)
            .unwrap_or(false)
    }

    /// Select the next target, round-robin over the non-failing subset.
    ///
    /// When every target is failing the full set is used instead: a degraded
    /// answer beats refusing to route while the health checker catches up.
    pub fn pick_target(&self) -> Option<&str> {
        if self.targets.is_empty() {
            return None;
        }

        let live: Vec<&str> = self
            .targets
            .iter()
            .filter(|t| !self.is_failing(t))
            .map(String::as_str)
            .collect();
        let pool: Vec<&str> = if live.is_empty() {
            self.targets.iter().map(String::as_str).collect()
        } else {
            live
        };

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) as usize % pool.len();
        Some(pool[index])
    }
}

/// An immutable point-in-time copy of the full registry.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    entries: Vec<SnapshotEntry>,
}

impl RegistrySnapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate entries in prefix order.
    pub fn entries(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    /// Longest-prefix match over all registered prefixes.
    ///
    /// Explicit longest-match selection: when several prefixes are textual
    /// prefixes of each other ("/api" and "/api/v2") the most specific one
    /// wins regardless of registration or iteration order.
    pub fn find_route(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries
            .iter()
            .filter(|entry| path.starts_with(&entry.prefix))
            .max_by_key(|entry| entry.prefix.len())
    }
}
