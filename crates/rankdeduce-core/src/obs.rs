//! Structured observability hooks for deduction run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span for instrumenting the run future
//! - Emission functions for key lifecycle events: start, baseline, per-source
//!   deduction, query failure, finish
//!
//! Events are emitted at `info!` (failures at `warn!`); filter with `RUST_LOG`.

use tracing::{info, warn};

use crate::domain::{FailureKind, FailurePhase, FailureSubject};

/// Span tagged with the run_id, for instrumenting futures.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("rankdeduce.run", run_id = %run_id)
}

/// Emit event: run started with the number of selected sources.
pub fn emit_run_started(run_id: &str, sources: usize) {
    info!(event = "run.started", run_id = %run_id, sources = sources);
}

/// Emit event: baseline triple solved.
pub fn emit_baseline_established(run_id: &str, triple: &str, entities: usize, triples_tried: usize) {
    info!(
        event = "baseline.established",
        run_id = %run_id,
        triple = %triple,
        entities = entities,
        triples_tried = triples_tried,
    );
}

/// Emit event: a candidate triple was abandoned.
pub fn emit_triple_rejected(run_id: &str, triple: &str, reason: &str) {
    warn!(event = "baseline.triple_rejected", run_id = %run_id, triple = %triple, reason = %reason);
}

/// Emit event: a non-baseline source was deduced.
pub fn emit_source_deduced(run_id: &str, source: &str, entities: usize, dropped: usize) {
    info!(
        event = "source.deduced",
        run_id = %run_id,
        source = %source,
        entities = entities,
        dropped = dropped,
    );
}

/// Emit event: a failure record was appended (warning level).
pub fn emit_failure_recorded(
    run_id: &str,
    subject: &FailureSubject,
    kind: FailureKind,
    phase: FailurePhase,
    attempts: u32,
) {
    warn!(
        event = "failure.recorded",
        run_id = %run_id,
        subject = %subject,
        kind = %kind,
        phase = ?phase,
        attempts = attempts,
    );
}

/// Emit event: run finished.
pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    sources_deduced: usize,
    failures: usize,
    cancelled: bool,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        sources_deduced = sources_deduced,
        failures = failures,
        cancelled = cancelled,
    );
}
