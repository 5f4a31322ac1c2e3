//! rankdeduce core library
//!
//! Recovers each source's individual entity values from pairwise averages:
//! solve one baseline triple in closed form, propagate every other source
//! from the baseline source, then aggregate per entity.

pub mod aggregate;
pub mod analysis;
pub mod baseline;
pub mod catalog;
pub mod client;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod fixture;
pub mod metrics;
pub mod obs;
pub mod propagation;
pub mod runner;
pub mod telemetry;

pub use aggregate::{AggregatedEntityResult, Aggregator};
pub use analysis::{
    most_contested, ranking_differences, source_coverage, source_deviations, RankingDifference,
    SourceCoverage, SourceDeviation,
};
pub use baseline::{solve_entity, BaselineSolution, BaselineSolver, BaselineTriple, TriplePlanner};
pub use catalog::{SourceCatalog, SourceSelection};
pub use client::{Credentials, PairQueryClient, Session};
pub use config::{parse_source_filter, EngineConfig};
pub use domain::{
    CoverageGap, DeductionTable, Entity, EntityDirectory, EntityId, FailureKind, FailurePhase,
    FailureRecord, FailureSubject, PairKey, PairQueryResult, RankedEntity, Source, SourceId,
};
pub use engine::{BaselineInfo, DeductionEngine, DeductionReport};
pub use error::{
    AuthError, CatalogError, ConfigError, EngineError, FixtureError, QueryError, QueryFailure, Result,
};
pub use fakes::ScriptedPairClient;
pub use fixture::{FixtureClient, FixtureDocument};
pub use metrics::{QueryMetrics, QueryMetricsSnapshot};
pub use propagation::{PropagationOutcome, PropagationPlanner, PropagationTarget};
pub use runner::{RetryPolicy, RetryingQueryRunner};
pub use telemetry::{init_tracing, LogFormat};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
