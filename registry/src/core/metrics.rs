//! Registry metrics for monitoring operations.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::inventory::QualifiedToolName;

/// Counters for registry operations.
pub struct RegistryMetrics {
    // Call metrics
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    retried_attempts: AtomicU64,
    active_calls: AtomicU64,

    // Health metrics
    health_checks: AtomicU64,
    failed_health_checks: AtomicU64,
    status_changes: AtomicU64,

    // Discovery metrics
    discoveries: AtomicU64,
    failed_discoveries: AtomicU64,

    // Per-tool latency tracking
    tool_latencies: DashMap<QualifiedToolName, LatencyStats>,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            retried_attempts: AtomicU64::new(0),
            active_calls: AtomicU64::new(0),
            health_checks: AtomicU64::new(0),
            failed_health_checks: AtomicU64::new(0),
            status_changes: AtomicU64::new(0),
            discoveries: AtomicU64::new(0),
            failed_discoveries: AtomicU64::new(0),
            tool_latencies: DashMap::new(),
        }
    }

    pub fn record_call_start(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.active_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a call that reached a server.
    pub fn record_call_end(&self, tool: &QualifiedToolName, success: bool, duration_ms: u64) {
        self.active_calls.fetch_sub(1, Ordering::Relaxed);
        self.record_outcome(success);
        self.tool_latencies
            .entry(tool.clone())
            .or_insert_with(LatencyStats::new)
            .record(duration_ms);
    }

    /// Record a call that failed before any request was sent.
    pub fn record_unresolved_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_health_check(&self, healthy: bool) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
        if !healthy {
            self.failed_health_checks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_status_change(&self) {
        self.status_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discovery(&self, success: bool) {
        self.discoveries.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_discoveries.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_outcome(&self, success: bool) {
        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            retried_attempts: self.retried_attempts.load(Ordering::Relaxed),
            active_calls: self.active_calls.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            failed_health_checks: self.failed_health_checks.load(Ordering::Relaxed),
            status_changes: self.status_changes.load(Ordering::Relaxed),
            discoveries: self.discoveries.load(Ordering::Relaxed),
            failed_discoveries: self.failed_discoveries.load(Ordering::Relaxed),
        }
    }

    pub fn tool_latency(&self, tool: &QualifiedToolName) -> Option<LatencySnapshot> {
        self.tool_latencies.get(tool).map(|stats| stats.snapshot())
    }

    pub fn all_tool_latencies(&self) -> Vec<(QualifiedToolName, LatencySnapshot)> {
        self.tool_latencies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.retried_attempts.store(0, Ordering::Relaxed);
        self.health_checks.store(0, Ordering::Relaxed);
        self.failed_health_checks.store(0, Ordering::Relaxed);
        self.status_changes.store(0, Ordering::Relaxed);
        self.discoveries.store(0, Ordering::Relaxed);
        self.failed_discoveries.store(0, Ordering::Relaxed);
        // active_calls tracks in-flight work and is left alone
        self.tool_latencies.clear();
    }
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tool latency statistics.
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        LatencySnapshot {
            count,
            avg_ms: if count > 0 { total / count } else { 0 },
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub retried_attempts: u64,
    pub active_calls: u64,
    pub health_checks: u64,
    pub failed_health_checks: u64,
    pub status_changes: u64,
    pub discoveries: u64,
    pub failed_discoveries: u64,
}

impl MetricsSnapshot {
    /// Success rate of completed calls as a percentage.
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_calls + self.failed_calls;
        if completed == 0 {
            100.0
        } else {
            (self.successful_calls as f64 / completed as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}
