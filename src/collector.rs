//! Collection pipeline.
//!
//! Pulls the six data domains from the remote API and assembles the
//! per-cycle [`Snapshot`]:
//!
//! - [`Pipeline`]: authenticated fetches with per-domain retry
//! - [`Snapshot`] / [`DomainError`]: best-effort aggregate plus failures
//! - Domain record types decoded from the remote JSON bodies

mod pipeline;
mod types;

pub use pipeline::{CollectError, Pipeline};
pub use types::{
    BodyMeasurement, CycleRecord, CycleScore, Domain, DomainError, RecordPage, RecoveryRecord,
    RecoveryScore, ScoreState, SleepRecord, SleepScore, Snapshot, UserProfile, WorkoutRecord,
    WorkoutScore,
};
