//! Ranked entities and the id -> label directory built up during a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque, stable entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// An entity as returned by a pairwise query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub label: String,
}

impl Entity {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(id),
            label: label.into(),
        }
    }
}

/// Display labels for every entity seen by any successful query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityDirectory(BTreeMap<EntityId, String>);

impl EntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record labels; later non-empty labels win.
    pub fn merge<'a>(&mut self, labels: impl IntoIterator<Item = (&'a EntityId, &'a String)>) {
        for (id, label) in labels {
            if !label.is_empty() || !self.0.contains_key(id) {
                self.0.insert(id.clone(), label.clone());
            }
        }
    }

    pub fn label(&self, id: &EntityId) -> Option<&str> {
        self.0.get(id).map(String::as_str).filter(|l| !l.is_empty())
    }

    /// Look an entity up by exact label.
    pub fn find_by_label(&self, label: &str) -> Option<&EntityId> {
        self.0
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
