//! Append-only failure log entries and coverage notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use super::source::SourceId;

/// Failure taxonomy recorded in the run's failure log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownSource,
    Timeout,
    AuthExpired,
    EmptyResult,
    TransportError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::UnknownSource => "unknown_source",
            FailureKind::Timeout => "timeout",
            FailureKind::AuthExpired => "auth_expired",
            FailureKind::EmptyResult => "empty_result",
            FailureKind::TransportError => "transport_error",
        };
        f.write_str(s)
    }
}

/// Stage of the run that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    Catalog,
    Baseline,
    Propagation,
}

/// What failed: a single source or a queried pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "ids")]
pub enum FailureSubject {
    Source(String),
    Pair(SourceId, SourceId),
}

impl std::fmt::Display for FailureSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureSubject::Source(id) => f.write_str(id),
            FailureSubject::Pair(x, y) => write!(f, "{x} + {y}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub subject: FailureSubject,
    pub kind: FailureKind,
    pub phase: FailurePhase,
    /// Retry attempts exhausted before giving up (0 when nothing was queried).
    pub attempts: u32,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(
        subject: FailureSubject,
        kind: FailureKind,
        phase: FailurePhase,
        attempts: u32,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            kind,
            phase,
            attempts,
            detail: detail.into(),
            recorded_at: Utc::now(),
        }
    }

    /// True when this record concerns `source`, alone or as half of a pair.
    pub fn involves(&self, source: &SourceId) -> bool {
        match &self.subject {
            FailureSubject::Source(id) => id == source.as_str(),
            FailureSubject::Pair(x, y) => x == source || y == source,
        }
    }
}

/// Informational partial-coverage note for one propagated source.
///
/// Never an error: the query itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageGap {
    pub source: SourceId,
    /// Returned by the source's query but absent from the baseline's coverage.
    pub missing_from_baseline: Vec<EntityId>,
    /// Covered by the baseline but not returned by the source's query.
    pub missing_from_query: Vec<EntityId>,
}

impl CoverageGap {
    pub fn is_empty(&self) -> bool {
        self.missing_from_baseline.is_empty() && self.missing_from_query.is_empty()
    }
}
