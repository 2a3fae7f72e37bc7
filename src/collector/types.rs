//! Domain records, the aggregate snapshot, and per-domain errors.
//!
//! Each collection cycle decodes the remote API's JSON bodies into these
//! strongly-typed records. A snapshot slot is `None` when its domain fetch
//! failed for the whole retry budget; the failure itself is carried in a
//! [`DomainError`] alongside the snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// One category of remote data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Domain {
    Profile,
    Body,
    Sleep,
    Recovery,
    Workout,
    Cycle,
}

impl Domain {
    /// Every domain, in collection order.
    pub const ALL: [Domain; 6] = [
        Domain::Profile,
        Domain::Body,
        Domain::Sleep,
        Domain::Recovery,
        Domain::Workout,
        Domain::Cycle,
    ];

    /// Fixed endpoint path for this domain.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Profile => "/v1/user/profile/basic",
            Self::Body => "/v1/user/measurement/body",
            Self::Sleep => "/v1/activity/sleep",
            Self::Recovery => "/v1/recovery",
            Self::Workout => "/v1/activity/workout",
            Self::Cycle => "/v1/cycle",
        }
    }

    /// Whether the endpoint returns a paginated record collection.
    ///
    /// Profile and body measurement are single resources; the rest return
    /// `{records, next_token}` pages.
    pub fn is_paginated(&self) -> bool {
        !matches!(self, Self::Profile | Self::Body)
    }
}

/// A domain fetch that failed after its retry budget.
#[derive(Debug, Clone, Serialize, Error)]
#[error("{domain} fetch failed: {reason}")]
pub struct DomainError {
    /// Which domain failed.
    pub domain: Domain,
    /// Underlying cause, rendered for logs and notifications.
    pub reason: String,
}

/// Scoring status reported alongside every activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreState {
    Scored,
    PendingScore,
    Unscorable,
}

/// Basic subject profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: u64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Latest body measurements for the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyMeasurement {
    pub height_meter: f64,
    pub weight_kilogram: f64,
    pub max_heart_rate: u32,
}

/// One sleep activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub id: u64,
    pub user_id: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub nap: bool,
    pub score_state: ScoreState,
    pub score: Option<SleepScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepScore {
    pub respiratory_rate: Option<f64>,
    pub sleep_performance_percentage: Option<f64>,
    pub sleep_efficiency_percentage: Option<f64>,
    pub total_in_bed_time_milli: u64,
}

/// Recovery assessment derived from a sleep and cycle pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub cycle_id: u64,
    pub sleep_id: u64,
    pub user_id: u64,
    pub score_state: ScoreState,
    pub score: Option<RecoveryScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryScore {
    pub user_calibrating: bool,
    pub recovery_score: f64,
    pub resting_heart_rate: f64,
    pub hrv_rmssd_milli: f64,
}

/// One workout activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub id: u64,
    pub user_id: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sport_id: i32,
    pub score_state: ScoreState,
    pub score: Option<WorkoutScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutScore {
    pub strain: f64,
    pub average_heart_rate: u32,
    pub max_heart_rate: u32,
    pub kilojoule: f64,
}

/// One physiological cycle. The current cycle has no `end` yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: u64,
    pub user_id: u64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub score_state: ScoreState,
    pub score: Option<CycleScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleScore {
    pub strain: f64,
    pub kilojoule: f64,
    pub average_heart_rate: u32,
    pub max_heart_rate: u32,
}

/// Wire shape of the collection endpoints: one page of records.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPage<T> {
    pub records: Vec<T>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Aggregate of one collection cycle across all domains.
///
/// Built fresh each cycle, handed to dispatch, then discarded; never merged
/// with a prior snapshot. A `None` slot means that domain failed this cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the cycle started (UTC).
    pub taken_at: DateTime<Utc>,
    pub profile: Option<UserProfile>,
    pub body: Option<BodyMeasurement>,
    pub sleep: Option<Vec<SleepRecord>>,
    pub recovery: Option<Vec<RecoveryRecord>>,
    pub workouts: Option<Vec<WorkoutRecord>>,
    pub cycles: Option<Vec<CycleRecord>>,
}

impl Snapshot {
    /// A snapshot with every slot empty.
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            profile: None,
            body: None,
            sleep: None,
            recovery: None,
            workouts: None,
            cycles: None,
        }
    }

    /// Whether every domain slot is populated.
    pub fn is_complete(&self) -> bool {
        self.profile.is_some()
            && self.body.is_some()
            && self.sleep.is_some()
            && self.recovery.is_some()
            && self.workouts.is_some()
            && self.cycles.is_some()
    }

    /// Number of populated domain slots.
    pub fn populated_domains(&self) -> usize {
        [
            self.profile.is_some(),
            self.body.is_some(),
            self.sleep.is_some(),
            self.recovery.is_some(),
            self.workouts.is_some(),
            self.cycles.is_some(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }
}
