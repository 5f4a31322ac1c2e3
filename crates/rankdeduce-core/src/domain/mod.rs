//! Data model shared by every stage of a deduction run.

pub mod entity;
pub mod failure;
pub mod query;
pub mod source;
pub mod table;

pub use entity::{Entity, EntityDirectory, EntityId};
pub use failure::{CoverageGap, FailureKind, FailurePhase, FailureRecord, FailureSubject};
pub use query::{PairKey, PairQueryResult, RankedEntity};
pub use source::{Source, SourceId};
pub use table::DeductionTable;
