//! Scoring and aggregation engine for the two-department mission board.
//!
//! The catalog, scorer, limit checks and aggregator are pure. All I/O goes
//! through the [`RecordStore`] trait.

use time::{OffsetDateTime, UtcOffset};

pub mod aggregate;
pub mod catalog;
mod error;
pub mod limits;
pub mod projector;
pub mod record;
pub mod scoring;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use aggregate::{
    aggregate, compare_missions, format_difference, AggregateSnapshot, MissionComparison,
    Standing,
};
pub use catalog::{
    CapUnit, Department, Mission, MissionCatalog, Modifier, MonthlyCap, Tally,
    MEDITATION_SHARE_THRESHOLD,
};
pub use error::{MissionError, StoreError, StoreResult};
pub use limits::{check_monthly_limit, monthly_usage, Contribution, LimitDecision};
pub use projector::{Projection, SubscriptionProjector};
pub use record::{
    format_date, normalize_members, parse_date, parse_year_month, record_key, DailyRecord,
    DateRange,
};
pub use scoring::{daily_total, mission_points, score_record, DayScore, MissionScore};
pub use service::{MissionService, MutationOutcome};
pub use store::{RecordStore, RecordSubscription, SubscriptionHub, UnconfiguredStore};

/// Parses an RFC3339 timestamp and requires a UTC offset.
///
/// # Errors
/// Returns [`MissionError::Validation`] for malformed or non-UTC input.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, MissionError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| MissionError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(MissionError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`MissionError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, MissionError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            MissionError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}
