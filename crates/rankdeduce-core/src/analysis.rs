//! Read-only views over a finished run: disagreement, coverage, outliers.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatedEntityResult;
use crate::domain::{DeductionTable, EntityId, SourceId};

/// How much of the entity universe one source covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCoverage {
    pub source: SourceId,
    pub entities: usize,
    pub mean_value: f64,
}

/// One source's value for an entity relative to the consensus mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDeviation {
    pub source: SourceId,
    pub value: f64,
    /// `value - mean`; negative means the source ranks the entity better.
    pub deviation: f64,
}

/// An entity two sources value at least a threshold apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingDifference {
    pub entity: EntityId,
    pub x_value: f64,
    pub y_value: f64,
    /// `|x_value - y_value|`.
    pub gap: f64,
}

/// Entities with the highest disagreement among at least `min_count` sources.
pub fn most_contested(
    results: &[AggregatedEntityResult],
    min_count: usize,
    n: usize,
) -> Vec<AggregatedEntityResult> {
    let mut contested: Vec<_> = results
        .iter()
        .filter(|r| r.count >= min_count)
        .cloned()
        .collect();
    contested.sort_by(|x, y| {
        y.std_dev
            .total_cmp(&x.std_dev)
            .then_with(|| x.entity.cmp(&y.entity))
    });
    contested.truncate(n);
    contested
}

/// Coverage per source, most entities first.
pub fn source_coverage(table: &DeductionTable) -> Vec<SourceCoverage> {
    let mut coverage: Vec<_> = table
        .sources()
        .map(|(source, values)| SourceCoverage {
            source: source.clone(),
            entities: values.len(),
            mean_value: values.values().sum::<f64>() / values.len().max(1) as f64,
        })
        .collect();
    coverage.sort_by(|x, y| y.entities.cmp(&x.entities).then_with(|| x.source.cmp(&y.source)));
    coverage
}

/// Per-source deviation from the consensus for `entity`, most optimistic first.
///
/// Empty when the entity is not in `aggregated`.
pub fn source_deviations(
    table: &DeductionTable,
    aggregated: &[AggregatedEntityResult],
    entity: &EntityId,
) -> Vec<SourceDeviation> {
    let Some(consensus) = aggregated.iter().find(|r| &r.entity == entity) else {
        return Vec::new();
    };
    let mut deviations: Vec<_> = table
        .values_for(entity)
        .into_iter()
        .map(|(source, value)| SourceDeviation {
            source: source.clone(),
            value,
            deviation: value - consensus.mean,
        })
        .collect();
    deviations.sort_by(|x, y| {
        x.deviation
            .total_cmp(&y.deviation)
            .then_with(|| x.source.cmp(&y.source))
    });
    deviations
}

/// Entities both `x` and `y` value, where they differ by at least
/// `threshold`; largest gap first.
///
/// Empty when either source is missing from the table.
pub fn ranking_differences(
    table: &DeductionTable,
    x: &SourceId,
    y: &SourceId,
    threshold: f64,
) -> Vec<RankingDifference> {
    let (Some(xs), Some(ys)) = (table.source(x), table.source(y)) else {
        return Vec::new();
    };
    let mut differences: Vec<_> = xs
        .iter()
        .filter_map(|(entity, &x_value)| {
            let y_value = *ys.get(entity)?;
            let gap = (x_value - y_value).abs();
            (gap >= threshold).then(|| RankingDifference {
                entity: entity.clone(),
                x_value,
                y_value,
                gap,
            })
        })
        .collect();
    differences.sort_by(|a, b| b.gap.total_cmp(&a.gap).then_with(|| a.entity.cmp(&b.entity)));
    differences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::domain::EntityDirectory;

    fn table() -> DeductionTable {
        let mut table = DeductionTable::new();
        let rows: [(&str, &[(&str, f64)]); 3] = [
            ("A", &[("p1", 1.0), ("p2", 2.0), ("p3", 3.0)]),
            ("B", &[("p1", 1.0), ("p2", 10.0)]),
            ("C", &[("p1", 1.0)]),
        ];
        for (source, values) in rows {
            table.insert_source(
                SourceId::from(source),
                values.iter().map(|(e, v)| (EntityId::from(*e), *v)).collect(),
            );
        }
        table
    }

    #[test]
    fn test_most_contested_respects_min_count() {
        let table = table();
        let aggregated = Aggregator::aggregate(&table, &EntityDirectory::new());

        let contested = most_contested(&aggregated, 2, 5);
        let ids: Vec<_> = contested.iter().map(|r| r.entity.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);

        assert_eq!(most_contested(&aggregated, 1, 1)[0].entity.as_str(), "p2");
    }

    #[test]
    fn test_source_coverage_ordering() {
        let coverage = source_coverage(&table());
        let order: Vec<_> = coverage.iter().map(|c| (c.source.as_str(), c.entities)).collect();
        assert_eq!(order, vec![("A", 3), ("B", 2), ("C", 1)]);
        assert_eq!(coverage[0].mean_value, 2.0);
    }

    #[test]
    fn test_source_deviations_sorted_optimistic_first() {
        let table = table();
        let aggregated = Aggregator::aggregate(&table, &EntityDirectory::new());

        let deviations = source_deviations(&table, &aggregated, &EntityId::from("p2"));
        assert_eq!(deviations.len(), 2);
        assert_eq!(deviations[0].source.as_str(), "A");
        assert_eq!(deviations[0].deviation, -4.0);
        assert_eq!(deviations[1].deviation, 4.0);

        assert!(source_deviations(&table, &aggregated, &EntityId::from("zz")).is_empty());
    }

    #[test]
    fn test_ranking_differences_over_shared_entities() {
        let mut table = table();
        table.insert_source(
            SourceId::from("D"),
            [("p1", 9.0), ("p2", 10.0), ("p3", 4.0), ("p4", 40.0)]
                .into_iter()
                .map(|(e, v)| (EntityId::from(e), v))
                .collect(),
        );
        let (a, d) = (SourceId::from("A"), SourceId::from("D"));

        // Equal gaps fall back to entity order; p4 is not shared.
        let diffs = ranking_differences(&table, &a, &d, 8.0);
        let found: Vec<_> = diffs.iter().map(|r| (r.entity.as_str(), r.gap)).collect();
        assert_eq!(found, vec![("p1", 8.0), ("p2", 8.0)]);
        assert_eq!(diffs[0].x_value, 1.0);
        assert_eq!(diffs[0].y_value, 9.0);

        let all = ranking_differences(&table, &SourceId::from("B"), &d, 0.0);
        let order: Vec<_> = all.iter().map(|r| (r.entity.as_str(), r.gap)).collect();
        assert_eq!(order, vec![("p1", 8.0), ("p2", 0.0)]);

        assert!(ranking_differences(&table, &a, &d, 8.5).is_empty());
        assert!(ranking_differences(&table, &a, &SourceId::from("Z"), 0.0).is_empty());
    }
}
