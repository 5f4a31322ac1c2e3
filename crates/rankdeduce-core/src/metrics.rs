//! Atomic query counters for one runner.
//!
//! Counters are incremented silently at the call site. Call
//! [`QueryMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run). Each runner owns its
//! own counters so concurrent runs never share them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lightweight atomic counters, safe to share across concurrent queries.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    queries: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    reauthentications: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`QueryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetricsSnapshot {
    pub queries: u64,
    pub attempts: u64,
    pub retries: u64,
    pub reauthentications: u64,
    pub timeouts: u64,
    pub failures: u64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One logical pair query started.
    pub fn inc_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "queries", "counter incremented");
    }

    /// One call made to the external client.
    pub fn inc_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    pub fn inc_reauthentications(&self) {
        self.reauthentications.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reauthentications", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// One logical query gave up after its retry budget.
    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failures", "counter incremented");
    }

    pub fn snapshot(&self) -> QueryMetricsSnapshot {
        QueryMetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            reauthentications: self.reauthentications.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            queries = s.queries,
            attempts = s.attempts,
            retries = s.retries,
            reauthentications = s.reauthentications,
            timeouts = s.timeouts,
            failures = s.failures,
        );
    }
}
