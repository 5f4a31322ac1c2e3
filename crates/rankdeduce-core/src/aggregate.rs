//! Per-entity aggregation across every deduced source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{DeductionTable, EntityDirectory, EntityId};

/// Consensus statistics for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedEntityResult {
    pub entity: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Contributing sources; always at least 1.
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation (divides by `count`).
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Pure aggregation over a completed deduction table.
pub struct Aggregator;

impl Aggregator {
    /// Aggregate every entity with at least one contributing value.
    ///
    /// Sorted by mean ascending (lower is better), ties broken by entity id.
    pub fn aggregate(table: &DeductionTable, directory: &EntityDirectory) -> Vec<AggregatedEntityResult> {
        let mut per_entity: BTreeMap<&EntityId, Vec<f64>> = BTreeMap::new();
        for (_, values) in table.sources() {
            for (entity, value) in values {
                per_entity.entry(entity).or_default().push(*value);
            }
        }

        let mut results: Vec<AggregatedEntityResult> = per_entity
            .into_iter()
            .filter_map(|(entity, values)| {
                let stats = Stats::of(&values)?;
                Some(AggregatedEntityResult {
                    entity: entity.clone(),
                    label: directory.label(entity).map(str::to_string),
                    count: values.len(),
                    mean: stats.mean,
                    std_dev: stats.std_dev,
                    min: stats.min,
                    max: stats.max,
                })
            })
            .collect();

        results.sort_by(|x, y| {
            x.mean
                .total_cmp(&y.mean)
                .then_with(|| x.entity.cmp(&y.entity))
        });
        results
    }
}

struct Stats {
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
}

impl Stats {
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}
