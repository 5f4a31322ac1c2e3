//! Error taxonomy for the deduction engine.
//!
//! Only [`EngineError`] ever reaches the caller of a run. Everything else is
//! recovered locally and surfaces through the failure log.

use crate::domain::failure::FailureKind;

/// Errors produced by the external capability while logging in.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("credentials rejected: {0}")]
    Rejected(String),

    #[error("authentication transport failure: {0}")]
    Transport(String),
}

/// Errors produced while listing the available sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("source listing unavailable: {0}")]
    Unavailable(String),

    #[error("session rejected while listing sources")]
    AuthExpired,
}

/// A single failed attempt at a pairwise query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("session expired")]
    AuthExpired,

    #[error("query returned no entities")]
    EmptyResult,

    #[error("transport error: {0}")]
    Transport(String),
}

impl QueryError {
    /// Failure-log classification for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            QueryError::Timeout { .. } => FailureKind::Timeout,
            QueryError::AuthExpired => FailureKind::AuthExpired,
            QueryError::EmptyResult => FailureKind::EmptyResult,
            QueryError::Transport(_) => FailureKind::TransportError,
        }
    }
}

/// A pairwise query that failed after its whole retry budget.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} after {attempts} attempt(s): {detail}")]
pub struct QueryFailure {
    pub kind: FailureKind,
    /// Attempts counted against the retry budget.
    pub attempts: u32,
    pub detail: String,
}

impl QueryFailure {
    pub fn new(error: &QueryError, attempts: u32) -> Self {
        Self {
            kind: error.kind(),
            attempts,
            detail: error.to_string(),
        }
    }
}

/// Invalid engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_retries must be at least 1")]
    ZeroRetries,

    #[error("propagation_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("baseline triple override names '{0}' more than once")]
    DuplicateBaselineSource(String),
}

/// Failures loading a fixture document.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed fixture: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid fixture: {0}")]
    Invalid(String),
}

/// Fatal run errors. Every other failure degrades coverage instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },

    #[error("no baseline triple could be solved ({triples_tried} tried over {sources} sources)")]
    BaselineUnsolvable { triples_tried: usize, sources: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<AuthError> for EngineError {
    fn from(err: AuthError) -> Self {
        EngineError::CatalogUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        EngineError::CatalogUnavailable {
            reason: err.to_string(),
        }
    }
}

/// Result type for engine runs.
pub type Result<T> = std::result::Result<T, EngineError>;
