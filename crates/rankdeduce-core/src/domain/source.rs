//! Sources: the rank providers that can only be observed in pairs.

use serde::{Deserialize, Serialize};

/// Stable identity of a source, rendered as `Name` or `Name (Affiliation)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        SourceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId(s.to_string())
    }
}

/// A listed source. Immutable once the catalog is populated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            affiliation: None,
        }
    }

    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        let affiliation = affiliation.into().trim().to_string();
        self.affiliation = (!affiliation.is_empty()).then_some(affiliation);
        self
    }

    pub fn id(&self) -> SourceId {
        match &self.affiliation {
            Some(aff) => SourceId(format!("{} ({})", self.name, aff)),
            None => SourceId(self.name.clone()),
        }
    }

    /// True when `selector` names this source by full id or bare name.
    pub fn matches(&self, selector: &str) -> bool {
        let selector = selector.trim();
        self.id().as_str() == selector || self.name == selector
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_includes_affiliation() {
        let source = Source::new("Jane Doe").with_affiliation("Daily Ranks");
        assert_eq!(source.id().as_str(), "Jane Doe (Daily Ranks)");
        assert_eq!(Source::new("Solo").id().as_str(), "Solo");
    }

    #[test]
    fn test_blank_affiliation_is_dropped() {
        let source = Source::new("Jane").with_affiliation("  ");
        assert!(source.affiliation.is_none());
    }

    #[test]
    fn test_matches_full_id_or_name() {
        let source = Source::new("Jane Doe").with_affiliation("Daily Ranks");
        assert!(source.matches("Jane Doe (Daily Ranks)"));
        assert!(source.matches(" Jane Doe "));
        assert!(!source.matches("Jane"));
    }
}
