//! Run orchestration: catalog, baseline establishment, propagation, aggregation.
//!
//! The engine is the single writer of the run's deduction table. The baseline
//! phase is strictly sequential; propagation may overlap queries up to
//! `propagation_concurrency`, with outcomes folded back into the table here in
//! target order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{AggregatedEntityResult, Aggregator};
use crate::baseline::{BaselineSolution, BaselineSolver, BaselineTriple, TriplePlanner};
use crate::catalog::SourceCatalog;
use crate::client::{Credentials, PairQueryClient};
use crate::config::EngineConfig;
use crate::domain::{
    CoverageGap, DeductionTable, EntityDirectory, FailureKind, FailurePhase, FailureRecord,
    FailureSubject, PairKey, PairQueryResult, Source, SourceId,
};
use crate::error::{EngineError, QueryFailure, Result};
use crate::metrics::QueryMetricsSnapshot;
use crate::obs;
use crate::propagation::{PropagationOutcome, PropagationPlanner, PropagationTarget};
use crate::runner::{RetryPolicy, RetryingQueryRunner};

/// Summary of the triple that anchored the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineInfo {
    pub triple: BaselineTriple,
    /// Source every other source was propagated from.
    pub baseline_source: SourceId,
    /// Entities solved for all three baseline sources.
    pub entities: usize,
    /// Entities returned by some baseline pair but not all three.
    pub skipped: usize,
    pub triples_tried: usize,
}

/// Everything a run produced. Partial when `cancelled` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Selected sources in selection order.
    pub sources: Vec<SourceId>,
    pub baseline: Option<BaselineInfo>,
    pub table: DeductionTable,
    pub directory: EntityDirectory,
    pub aggregated: Vec<AggregatedEntityResult>,
    pub failures: Vec<FailureRecord>,
    pub coverage_gaps: Vec<CoverageGap>,
    pub metrics: QueryMetricsSnapshot,
}

impl DeductionReport {
    /// Sources with at least one deduced value.
    pub fn deduced_sources(&self) -> usize {
        self.table.source_count()
    }

    pub fn failures_for<'a>(&'a self, source: &'a SourceId) -> impl Iterator<Item = &'a FailureRecord> {
        self.failures.iter().filter(move |f| f.involves(source))
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Mutable state of one run. Owned by the orchestrating task only.
struct RunContext {
    run_id: String,
    table: DeductionTable,
    directory: EntityDirectory,
    failures: Vec<FailureRecord>,
    gaps: Vec<CoverageGap>,
    pair_cache: HashMap<PairKey, PairQueryResult>,
    failed_pairs: HashMap<PairKey, QueryFailure>,
    triples_tried: usize,
    cancelled: bool,
}

enum PairFetch {
    Ready(PairQueryResult),
    Failed(QueryFailure),
    Cancelled,
}

impl RunContext {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            table: DeductionTable::new(),
            directory: EntityDirectory::new(),
            failures: Vec::new(),
            gaps: Vec::new(),
            pair_cache: HashMap::new(),
            failed_pairs: HashMap::new(),
            triples_tried: 0,
            cancelled: false,
        }
    }

    fn record(&mut self, record: FailureRecord) {
        obs::emit_failure_recorded(
            &self.run_id,
            &record.subject,
            record.kind,
            record.phase,
            record.attempts,
        );
        self.failures.push(record);
    }

    fn record_unknown(&mut self, name: &str) {
        self.record(FailureRecord::new(
            FailureSubject::Source(name.to_string()),
            FailureKind::UnknownSource,
            FailurePhase::Catalog,
            0,
            "not present in the source listing",
        ));
    }

    /// Cached result, or a fresh query whose outcome is cached either way.
    async fn fetch_pair(
        &mut self,
        runner: &RetryingQueryRunner,
        x: &Source,
        y: &Source,
        cancel: &CancellationToken,
    ) -> PairFetch {
        let key = PairKey::new(&x.id(), &y.id());
        if let Some(hit) = self.pair_cache.get(&key) {
            debug!(pair = %key, "pair result served from cache");
            return PairFetch::Ready(hit.clone());
        }
        if cancel.is_cancelled() {
            self.cancelled = true;
            return PairFetch::Cancelled;
        }

        match runner.query(x, y).await {
            Ok(result) => {
                self.directory.merge(&result.labels);
                self.pair_cache.insert(key, result.clone());
                PairFetch::Ready(result)
            }
            Err(failure) => {
                self.failed_pairs.insert(key, failure.clone());
                self.record(FailureRecord::new(
                    FailureSubject::Pair(x.id(), y.id()),
                    failure.kind,
                    FailurePhase::Baseline,
                    failure.attempts,
                    failure.detail.clone(),
                ));
                PairFetch::Failed(failure)
            }
        }
    }
}

/// Drives one deduction run over an injected [`PairQueryClient`].
pub struct DeductionEngine {
    client: Arc<dyn PairQueryClient>,
    credentials: Credentials,
    config: EngineConfig,
}

impl DeductionEngine {
    /// Build an engine; fails only on invalid configuration.
    pub fn new(
        client: Arc<dyn PairQueryClient>,
        credentials: Credentials,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            credentials,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run to completion.
    pub async fn run(&self) -> Result<DeductionReport> {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Run until done or until `cancel` fires.
    ///
    /// Cancellation is checked before every query. A cancelled run returns
    /// whatever was deduced so far with `cancelled` set; it is not an error.
    /// Only `CatalogUnavailable` and `BaselineUnsolvable` fail the run.
    pub async fn run_with_cancel(&self, cancel: CancellationToken) -> Result<DeductionReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.execute(run_id, cancel).instrument(span).await
    }

    #[instrument(
        name = "deduction",
        skip_all,
        fields(
            max_retries = self.config.max_retries,
            concurrency = self.config.propagation_concurrency
        )
    )]
    async fn execute(&self, run_id: String, cancel: CancellationToken) -> Result<DeductionReport> {
        let started = Instant::now();
        let started_at = Utc::now();

        let policy = RetryPolicy::from(&self.config);
        let runner =
            RetryingQueryRunner::connect(Arc::clone(&self.client), self.credentials.clone(), policy)
                .await?;

        let catalog = SourceCatalog::from_listing(runner.list_sources().await?);
        if catalog.is_empty() {
            return Err(EngineError::CatalogUnavailable {
                reason: "source listing is empty".to_string(),
            });
        }

        let selection = catalog.select(self.config.source_filter.as_deref(), self.config.max_sources);
        let mut ctx = RunContext::new(run_id);
        for name in &selection.unknown {
            ctx.record_unknown(name);
        }
        let selected: Vec<SourceId> = selection.sources.iter().map(Source::id).collect();
        obs::emit_run_started(&ctx.run_id, selected.len());

        let baseline_override = self.resolve_override(&catalog, &mut ctx);

        let solution = match self
            .establish_baseline(&runner, &selection.sources, baseline_override, &mut ctx, &cancel)
            .await
        {
            Some(solution) => solution,
            None if ctx.cancelled => {
                info!(run_id = %ctx.run_id, "run cancelled before a baseline was established");
                return Ok(self.finish(ctx, &runner, selected, None, started, started_at));
            }
            None => {
                runner.flush_metrics();
                return Err(EngineError::BaselineUnsolvable {
                    triples_tried: ctx.triples_tried,
                    sources: selection.sources.len(),
                });
            }
        };

        let info = BaselineInfo {
            triple: solution.triple.clone(),
            baseline_source: solution.triple.a.id(),
            entities: solution.coverage(),
            skipped: solution.skipped.len(),
            triples_tried: ctx.triples_tried,
        };
        obs::emit_baseline_established(
            &ctx.run_id,
            &solution.triple.to_string(),
            info.entities,
            info.triples_tried,
        );

        let [id_a, id_b, id_c] = solution.triple.ids();
        ctx.table.insert_source(id_a, solution.rank_a.clone());
        ctx.table.insert_source(id_b, solution.rank_b.clone());
        ctx.table.insert_source(id_c, solution.rank_c.clone());

        self.propagate(&runner, &selection.sources, &solution, &mut ctx, &cancel)
            .await;

        Ok(self.finish(ctx, &runner, selected, Some(info), started, started_at))
    }

    /// Resolve the configured override against the full catalog.
    ///
    /// Names missing from the listing are recorded as unknown sources and the
    /// override is dropped in favour of catalog order.
    fn resolve_override(&self, catalog: &SourceCatalog, ctx: &mut RunContext) -> Option<BaselineTriple> {
        let names = self.config.baseline_triple_override.as_ref()?;
        let resolved: Vec<Option<&Source>> = names.iter().map(|n| catalog.find(n)).collect();

        match resolved.as_slice() {
            [Some(a), Some(b), Some(c)] => {
                let triple = BaselineTriple::new((*a).clone(), (*b).clone(), (*c).clone());
                let [x, y, z] = triple.ids();
                if x == y || x == z || y == z {
                    warn!(
                        run_id = %ctx.run_id,
                        triple = %triple,
                        "baseline override names one source twice, falling back to catalog order"
                    );
                    return None;
                }
                Some(triple)
            }
            _ => {
                for (name, found) in names.iter().zip(&resolved) {
                    if found.is_none() {
                        ctx.record_unknown(name);
                    }
                }
                warn!(run_id = %ctx.run_id, "baseline override ignored, falling back to catalog order");
                None
            }
        }
    }

    /// Try candidate triples in order until one solves.
    ///
    /// `None` means cancellation (flagged on `ctx`) or exhaustion.
    async fn establish_baseline(
        &self,
        runner: &RetryingQueryRunner,
        sources: &[Source],
        baseline_override: Option<BaselineTriple>,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Option<BaselineSolution> {
        for triple in TriplePlanner::new(sources.to_vec(), baseline_override) {
            if let Some(max) = self.config.max_baseline_triples {
                if ctx.triples_tried >= max {
                    warn!(run_id = %ctx.run_id, max, "baseline triple budget exhausted");
                    break;
                }
            }
            if cancel.is_cancelled() {
                ctx.cancelled = true;
                return None;
            }
            let label = triple.to_string();
            if let Some(key) = triple.pair_keys().iter().find(|k| ctx.failed_pairs.contains_key(*k)) {
                debug!(triple = %label, pair = %key, "skipping triple with a known failed pair");
                continue;
            }
            ctx.triples_tried += 1;

            let mut averages = Vec::with_capacity(3);
            for (x, y) in triple.pairs() {
                match ctx.fetch_pair(runner, x, y, cancel).await {
                    PairFetch::Ready(result) => averages.push(result.averages),
                    PairFetch::Failed(failure) => {
                        let reason = format!("pair {x} + {y} failed: {}", failure.detail);
                        obs::emit_triple_rejected(&ctx.run_id, &label, &reason);
                        break;
                    }
                    PairFetch::Cancelled => return None,
                }
            }
            let [ab, ac, bc] = averages.as_slice() else {
                continue;
            };

            let solution = BaselineSolver::solve(&triple, ab, ac, bc);
            if solution.coverage() == 0 {
                obs::emit_triple_rejected(&ctx.run_id, &label, "no entity common to all three pairs");
                continue;
            }
            return Some(solution);
        }
        None
    }

    async fn propagate(
        &self,
        runner: &RetryingQueryRunner,
        sources: &[Source],
        solution: &BaselineSolution,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) {
        let baseline = &solution.triple.a;
        let baseline_id = baseline.id();
        let mut targets = Vec::new();
        for source in sources.iter().filter(|s| !solution.triple.contains(&s.id())) {
            let key = PairKey::new(&baseline_id, &source.id());
            // Already exhausted its retries while trying triples.
            if let Some(failure) = ctx.failed_pairs.get(&key).cloned() {
                ctx.record(FailureRecord::new(
                    FailureSubject::Source(source.id().to_string()),
                    failure.kind,
                    FailurePhase::Propagation,
                    failure.attempts,
                    failure.detail,
                ));
                continue;
            }
            targets.push(PropagationTarget {
                source: source.clone(),
                cached: ctx.pair_cache.get(&key).cloned(),
            });
        }
        if targets.is_empty() {
            return;
        }

        let planner = PropagationPlanner::new(baseline, &solution.rank_a);
        let outcomes = planner
            .propagate(runner, targets, self.config.propagation_concurrency, cancel)
            .await;

        for outcome in outcomes {
            match outcome {
                PropagationOutcome::Deduced(deduced) => {
                    let id = deduced.source.id();
                    ctx.directory.merge(&deduced.labels);
                    obs::emit_source_deduced(
                        &ctx.run_id,
                        id.as_str(),
                        deduced.values.len(),
                        deduced.gap.missing_from_baseline.len(),
                    );
                    if !deduced.gap.is_empty() {
                        ctx.gaps.push(deduced.gap);
                    }
                    ctx.table.insert_source(id, deduced.values);
                }
                PropagationOutcome::Failed { source, failure } => {
                    ctx.record(FailureRecord::new(
                        FailureSubject::Source(source.id().to_string()),
                        failure.kind,
                        FailurePhase::Propagation,
                        failure.attempts,
                        failure.detail,
                    ));
                }
                PropagationOutcome::Cancelled { source } => {
                    debug!(source = %source, "propagation skipped after cancellation");
                    ctx.cancelled = true;
                }
            }
        }
    }

    fn finish(
        &self,
        ctx: RunContext,
        runner: &RetryingQueryRunner,
        sources: Vec<SourceId>,
        baseline: Option<BaselineInfo>,
        started: Instant,
        started_at: DateTime<Utc>,
    ) -> DeductionReport {
        let aggregated = Aggregator::aggregate(&ctx.table, &ctx.directory);
        runner.flush_metrics();
        obs::emit_run_finished(
            &ctx.run_id,
            started.elapsed().as_millis() as u64,
            ctx.table.source_count(),
            ctx.failures.len(),
            ctx.cancelled,
        );

        DeductionReport {
            run_id: ctx.run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: ctx.cancelled,
            sources,
            baseline,
            table: ctx.table,
            directory: ctx.directory,
            aggregated,
            failures: ctx.failures,
            coverage_gaps: ctx.gaps,
            metrics: runner.metrics(),
        }
    }
}
