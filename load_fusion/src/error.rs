//! Error types for the fusion pipeline.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, FusionError>;

/// Errors that abort a fusion run.
///
/// Referential gaps (unassigned ZIPs, orphaned profile-hours) are not errors;
/// they are accumulated in [`crate::FusionDiagnostics`].
#[derive(Debug, Error)]
pub enum FusionError {
    /// A climate zone id has no territory in the static mapping.
    #[error("climate zone {agency_zone_id} is not mapped to a territory")]
    UnmappedZone { agency_zone_id: i64 },

    /// The same profile id appears more than once in the unioned catalog.
    #[error("duplicate profile ids in catalog: {}", join_ids(.profile_ids))]
    DuplicateProfile { profile_ids: BTreeSet<String> },

    /// A profile partition would exceed the configured memory bound.
    #[error("resource exhausted while fusing profile {profile_id}: {requested_rows} rows requested, limit {limit}")]
    ResourceExhausted {
        profile_id: String,
        requested_rows: u64,
        limit: u64,
    },

    #[error("duplicate hourly record for profile {profile_id} on {date} hour {hour}")]
    DuplicateHourlyKey {
        profile_id: String,
        date: NaiveDate,
        hour: u8,
    },

    #[error("hour {hour} out of range 0-23 for profile {profile_id}")]
    HourOutOfRange { profile_id: String, hour: i64 },

    /// The streaming join saw a profile again after its partition was closed.
    #[error("hourly series is not grouped by profile: {profile_id} reappears after its partition closed")]
    HourlySeriesNotGrouped { profile_id: String },

    #[error("invalid ZIP code: {value:?}")]
    InvalidZipCode { value: String },

    #[error("invalid attributes for ZIP {zip_code}: {reason}")]
    InvalidZipAttributes { zip_code: String, reason: String },

    #[error("ZIP {zip_code} appears more than once")]
    DuplicateZip { zip_code: String },

    #[error("unknown territory label: {label:?}")]
    UnknownTerritory { label: String },

    #[error("schema error: {message}")]
    Schema { message: String },

    #[error("output sink error: {message}")]
    Sink { message: String },

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl FusionError {
    /// Structural errors violate a total-mapping or uniqueness invariant.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FusionError::UnmappedZone { .. }
                | FusionError::DuplicateProfile { .. }
                | FusionError::DuplicateHourlyKey { .. }
                | FusionError::DuplicateZip { .. }
        )
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        FusionError::Schema {
            message: message.into(),
        }
    }
}

fn join_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().cloned().collect::<Vec<_>>().join(", ")
}
