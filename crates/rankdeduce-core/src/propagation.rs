//! Baseline-relative propagation.
//!
//! Once the baseline source A has individual values, every other source X
//! needs a single `(A, X)` query:
//!
//! ```text
//! rank_X[e] = 2 * avg_AX[e] - rank_A[e]
//! ```
//!
//! for each entity in both the query result and A's coverage. Non-baseline
//! sources are independent, so their queries may run concurrently.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{CoverageGap, EntityId, PairQueryResult, Source};
use crate::error::QueryFailure;
use crate::runner::RetryingQueryRunner;

/// A source awaiting propagation, with any `(A, X)` result already in hand.
#[derive(Debug, Clone)]
pub struct PropagationTarget {
    pub source: Source,
    pub cached: Option<PairQueryResult>,
}

/// Values deduced for one non-baseline source.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagatedSource {
    pub source: Source,
    pub values: BTreeMap<EntityId, f64>,
    pub gap: CoverageGap,
    pub labels: BTreeMap<EntityId, String>,
}

#[derive(Debug, Clone)]
pub enum PropagationOutcome {
    Deduced(PropagatedSource),
    Failed { source: Source, failure: QueryFailure },
    /// Cancellation was observed before this source's query was issued.
    Cancelled { source: Source },
}

/// Derives non-baseline sources from the fixed baseline source.
pub struct PropagationPlanner<'a> {
    baseline: &'a Source,
    rank_a: &'a BTreeMap<EntityId, f64>,
}

impl<'a> PropagationPlanner<'a> {
    pub fn new(baseline: &'a Source, rank_a: &'a BTreeMap<EntityId, f64>) -> Self {
        Self { baseline, rank_a }
    }

    /// Deduce X's values from the `(A, X)` averages.
    pub fn deduce(&self, source: &Source, avg_ax: &BTreeMap<EntityId, f64>) -> (BTreeMap<EntityId, f64>, CoverageGap) {
        let mut values = BTreeMap::new();
        let mut missing_from_baseline = Vec::new();

        for (entity, &avg) in avg_ax {
            match self.rank_a.get(entity) {
                Some(&rank_a) => {
                    values.insert(entity.clone(), 2.0 * avg - rank_a);
                }
                None => missing_from_baseline.push(entity.clone()),
            }
        }

        let missing_from_query = self
            .rank_a
            .keys()
            .filter(|e| !avg_ax.contains_key(*e))
            .cloned()
            .collect();

        let gap = CoverageGap {
            source: source.id(),
            missing_from_baseline,
            missing_from_query,
        };
        (values, gap)
    }

    /// Propagate every target, issuing up to `concurrency` queries at once.
    ///
    /// Outcomes come back in target order regardless of completion order.
    /// Cancellation is checked before each query is issued.
    pub async fn propagate(
        &self,
        runner: &RetryingQueryRunner,
        targets: Vec<PropagationTarget>,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Vec<PropagationOutcome> {
        stream::iter(targets)
            .map(|target| self.propagate_one(runner, target, cancel))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn propagate_one(
        &self,
        runner: &RetryingQueryRunner,
        target: PropagationTarget,
        cancel: &CancellationToken,
    ) -> PropagationOutcome {
        let PropagationTarget { source, cached } = target;

        let result = match cached {
            Some(result) => {
                debug!(source = %source, "reusing cached baseline pair result");
                result
            }
            None => {
                if cancel.is_cancelled() {
                    return PropagationOutcome::Cancelled { source };
                }
                match runner.query(self.baseline, &source).await {
                    Ok(result) => result,
                    Err(failure) => return PropagationOutcome::Failed { source, failure },
                }
            }
        };

        let (values, gap) = self.deduce(&source, &result.averages);
        PropagationOutcome::Deduced(PropagatedSource {
            source,
            values,
            gap,
            labels: result.labels,
        })
    }
}
