//! File-backed [`PairQueryClient`] for offline runs and integration tests.
//!
//! A fixture lists each source's individual values; pair queries answer with
//! the exact average over the entities both sources rank. Faults can be
//! scripted per pair or per source.
//!
//! ```json
//! {
//!   "sources": [
//!     { "name": "Jane Doe", "affiliation": "Daily Ranks", "rankings": { "p1": 3.0 } }
//!   ],
//!   "labels": { "p1": "Player One" },
//!   "faults": [ { "pair": ["Jane Doe", "Sam Roe"], "fault": "timeout", "times": 1 } ],
//!   "unavailable": ["Sam Roe"]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{Credentials, PairQueryClient, Session};
use crate::domain::{RankedEntity, Source, SourceId};
use crate::error::{AuthError, CatalogError, FixtureError, QueryError};
use crate::fakes::ScriptedPairClient;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureDocument {
    pub sources: Vec<FixtureSource>,
    /// Entity id -> display label.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub faults: Vec<FixturePairFault>,
    /// Sources whose every query fails with a transport error.
    #[serde(default)]
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    /// Entity id -> individual value.
    pub rankings: BTreeMap<String, f64>,
}

impl FixtureSource {
    fn source(&self) -> Source {
        let source = Source::new(&self.name);
        match &self.affiliation {
            Some(aff) => source.with_affiliation(aff),
            None => source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureFault {
    Transport,
    EmptyResult,
    /// Never answers; the runner's per-attempt timeout fires.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixturePairFault {
    pub pair: [String; 2],
    pub fault: FixtureFault,
    /// Fail only the first `times` queries; always when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<usize>,
}

/// Fixture document served through the scripted fake.
#[derive(Debug)]
pub struct FixtureClient {
    inner: ScriptedPairClient,
    sources: usize,
}

impl FixtureClient {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, FixtureError> {
        let document: FixtureDocument = serde_json::from_str(raw)?;
        Self::from_document(document)
    }

    /// Validate and build. Faults must name listed sources.
    pub fn from_document(document: FixtureDocument) -> Result<Self, FixtureError> {
        if document.sources.is_empty() {
            return Err(FixtureError::Invalid("fixture lists no sources".to_string()));
        }

        let listed: Vec<Source> = document.sources.iter().map(FixtureSource::source).collect();
        let mut seen = HashSet::new();
        for source in &listed {
            if !seen.insert(source.id()) {
                return Err(FixtureError::Invalid(format!("duplicate source '{source}'")));
            }
        }
        let resolve = |selector: &str| -> Result<SourceId, FixtureError> {
            listed
                .iter()
                .find(|s| s.matches(selector))
                .map(Source::id)
                .ok_or_else(|| FixtureError::Invalid(format!("unknown source '{selector}'")))
        };

        let mut client = ScriptedPairClient::new();
        for (entry, source) in document.sources.iter().zip(&listed) {
            let values: Vec<(&str, f64)> = entry
                .rankings
                .iter()
                .map(|(entity, value)| (entity.as_str(), *value))
                .collect();
            client = client.with_source(source.clone(), &values);
        }
        for (entity, label) in &document.labels {
            client = client.with_label(entity, label);
        }

        for fault in &document.faults {
            let x = resolve(&fault.pair[0])?;
            let y = resolve(&fault.pair[1])?;
            if x == y {
                return Err(FixtureError::Invalid(format!("fault pairs '{x}' with itself")));
            }
            let (x, y) = (x.as_str(), y.as_str());
            client = match (fault.fault, fault.times) {
                (FixtureFault::Timeout, times) => client.stall_pair(x, y, times.unwrap_or(usize::MAX)),
                (kind, Some(times)) => client.fail_pair(x, y, vec![kind.error(); times]),
                (kind, None) => client.fail_pair_always(x, y, kind.error()),
            };
        }
        for selector in &document.unavailable {
            let id = resolve(selector)?;
            client = client.fail_source_always(
                id.as_str(),
                QueryError::Transport(format!("source '{id}' unavailable")),
            );
        }

        debug!(
            sources = listed.len(),
            faults = document.faults.len(),
            "fixture loaded"
        );
        Ok(Self {
            inner: client,
            sources: listed.len(),
        })
    }

    pub fn source_count(&self) -> usize {
        self.sources
    }
}

impl FixtureFault {
    fn error(self) -> QueryError {
        match self {
            FixtureFault::Transport => QueryError::Transport("scripted fault".to_string()),
            FixtureFault::EmptyResult => QueryError::EmptyResult,
            FixtureFault::Timeout => QueryError::Timeout { limit_ms: 0 },
        }
    }
}

#[async_trait]
impl PairQueryClient for FixtureClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        self.inner.login(credentials).await
    }

    async fn list_sources(&self, session: &Session) -> Result<Vec<Source>, CatalogError> {
        self.inner.list_sources(session).await
    }

    async fn query_pair(
        &self,
        session: &Session,
        x: &Source,
        y: &Source,
    ) -> Result<Vec<RankedEntity>, QueryError> {
        self.inner.query_pair(session, x, y).await
    }
}
