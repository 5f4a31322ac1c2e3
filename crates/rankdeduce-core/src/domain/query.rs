//! Pairwise query results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityId};
use super::source::SourceId;

/// Unordered pair of sources; `(x, y)` and `(y, x)` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey(SourceId, SourceId);

impl PairKey {
    pub fn new(x: &SourceId, y: &SourceId) -> Self {
        if x <= y {
            PairKey(x.clone(), y.clone())
        } else {
            PairKey(y.clone(), x.clone())
        }
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        &self.0 == id || &self.1 == id
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} + {}", self.0, self.1)
    }
}

/// One row of a pairwise query: an entity and the pair's average value for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntity {
    pub entity: Entity,
    pub average: f64,
}

impl RankedEntity {
    pub fn new(id: impl Into<String>, label: impl Into<String>, average: f64) -> Self {
        Self {
            entity: Entity::new(id, label),
            average,
        }
    }
}

/// Successful result of querying two sources.
///
/// The key set is exactly what the query returned and need not match any
/// other query's key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairQueryResult {
    pub first: SourceId,
    pub second: SourceId,
    pub averages: BTreeMap<EntityId, f64>,
    pub labels: BTreeMap<EntityId, String>,
    /// Attempts counted against the retry budget, including the successful one.
    pub attempts: u32,
}

impl PairQueryResult {
    /// Build from raw query rows, dropping non-finite and negative averages.
    pub fn from_rows(first: SourceId, second: SourceId, rows: Vec<RankedEntity>, attempts: u32) -> Self {
        let mut averages = BTreeMap::new();
        let mut labels = BTreeMap::new();
        for row in rows {
            let invalid = if !row.average.is_finite() {
                Some("non-finite")
            } else if row.average < 0.0 {
                Some("negative")
            } else {
                None
            };
            if let Some(reason) = invalid {
                tracing::warn!(
                    entity = %row.entity.id,
                    pair = %PairKey::new(&first, &second),
                    average = row.average,
                    reason,
                    "dropping invalid pair average"
                );
                continue;
            }
            averages.insert(row.entity.id.clone(), row.average);
            labels.insert(row.entity.id, row.entity.label);
        }
        Self {
            first,
            second,
            averages,
            labels,
            attempts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }
}
