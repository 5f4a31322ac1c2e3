//! The per-run Source -> {Entity -> value} accumulation table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use super::source::SourceId;

/// Deduced individual values, scoped per source.
///
/// Entity slots are source-scoped, so two sources never share a slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeductionTable {
    values: BTreeMap<SourceId, BTreeMap<EntityId, f64>>,
}

impl DeductionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a source's deduced values. Sources with no values are not stored.
    pub fn insert_source(&mut self, source: SourceId, values: BTreeMap<EntityId, f64>) {
        if values.is_empty() {
            return;
        }
        self.values.insert(source, values);
    }

    pub fn source(&self, source: &SourceId) -> Option<&BTreeMap<EntityId, f64>> {
        self.values.get(source)
    }

    pub fn value(&self, source: &SourceId, entity: &EntityId) -> Option<f64> {
        self.values.get(source).and_then(|m| m.get(entity)).copied()
    }

    pub fn sources(&self) -> impl Iterator<Item = (&SourceId, &BTreeMap<EntityId, f64>)> {
        self.values.iter()
    }

    /// Every contributing value for `entity`, in source order.
    pub fn values_for(&self, entity: &EntityId) -> Vec<(&SourceId, f64)> {
        self.values
            .iter()
            .filter_map(|(source, m)| m.get(entity).map(|v| (source, *v)))
            .collect()
    }

    pub fn contains_source(&self, source: &SourceId) -> bool {
        self.values.contains_key(source)
    }

    pub fn source_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
