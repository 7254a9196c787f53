//! Per-domain request metrics.
//!
//! Counters are atomics updated on the submit path; per-state counters sit
//! behind a small mutex since they are keyed by state name.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug)]
pub struct DomainMetrics {
    requests: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    generation_failures: AtomicU64,
    healthy: AtomicBool,
    state_entries: Mutex<BTreeMap<String, u64>>,
}

impl Default for DomainMetrics {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            state_entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl DomainMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// An accepted fragment leaving the entity in `state`
    pub fn record_accepted(&self, state: &str) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        *self.state_entries.lock().entry(state.to_string()).or_insert(0) += 1;
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            healthy: self.is_healthy(),
            state_entries: self.state_entries.lock().clone(),
        }
    }
}

/// Point-in-time copy of [`DomainMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub generation_failures: u64,
    pub healthy: bool,
    /// How many accepted fragments left an entity in each state
    pub state_entries: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Fraction of finished requests that were rejected (0.0 when idle)
    pub fn rejection_rate(&self) -> f64 {
        let finished = self.accepted + self.rejected;
        if finished == 0 {
            0.0
        } else {
            self.rejected as f64 / finished as f64
        }
    }
}
