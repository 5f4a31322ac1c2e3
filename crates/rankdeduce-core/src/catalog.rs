//! Ordered catalog of the sources available for deduction.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::client::{PairQueryClient, Session};
use crate::domain::{Source, SourceId};
use crate::error::CatalogError;

/// Sources in upstream listing order. Never mutated after population.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: Vec<Source>,
}

/// Outcome of applying an allow-list and cap to the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSelection {
    pub sources: Vec<Source>,
    /// Allow-list entries that matched nothing in the listing.
    pub unknown: Vec<String>,
}

impl SourceCatalog {
    /// Populate from a raw listing, dropping repeated ids.
    pub fn from_listing(listing: Vec<Source>) -> Self {
        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(listing.len());
        for source in listing {
            if seen.insert(source.id()) {
                sources.push(source);
            } else {
                debug!(source = %source, "duplicate source in listing ignored");
            }
        }
        Self { sources }
    }

    /// Fetch the listing through the external capability.
    pub async fn load(client: &dyn PairQueryClient, session: &Session) -> Result<Self, CatalogError> {
        let listing = client.list_sources(session).await?;
        Ok(Self::from_listing(listing))
    }

    pub fn list(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn find(&self, selector: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.matches(selector))
    }

    /// Apply an optional allow-list, then an optional cap.
    ///
    /// With an allow-list the result follows the allow-list order. Unmatched
    /// names are returned in `unknown` rather than failing the selection.
    pub fn select(&self, filter: Option<&[String]>, max_sources: Option<usize>) -> SourceSelection {
        let mut selection = SourceSelection::default();

        match filter {
            Some(names) => {
                let mut picked: HashSet<SourceId> = HashSet::new();
                for name in names {
                    match self.find(name) {
                        Some(source) => {
                            if picked.insert(source.id()) {
                                selection.sources.push(source.clone());
                            }
                        }
                        None => {
                            warn!(source = %name, "filtered source not present in catalog");
                            selection.unknown.push(name.clone());
                        }
                    }
                }
            }
            None => selection.sources = self.sources.clone(),
        }

        if let Some(max) = max_sources {
            selection.sources.truncate(max);
        }
        selection
    }
}
