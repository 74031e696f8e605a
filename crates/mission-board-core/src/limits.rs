//! Monthly cap checks run before a mutation reaches the store.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::catalog::{CapUnit, Mission};
use crate::record::{DailyRecord, DateRange};
use crate::store::RecordStore;
use crate::MissionError;

/// What the edited day would hold after the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    /// A stored count for a counted mission.
    Count(u32),
    /// Size of the member list for a member-list mission.
    Members(usize),
}

impl Contribution {
    /// Converts the raw contribution into the cap's unit.
    #[must_use]
    pub fn in_unit(self, unit: CapUnit) -> u32 {
        let raw = match self {
            Self::Count(count) => count,
            Self::Members(size) => u32::try_from(size).unwrap_or(u32::MAX),
        };
        match unit {
            CapUnit::DistinctDays => u32::from(raw > 0),
            CapUnit::Count => raw,
        }
    }

    /// Contribution already stored on `record` for `mission`.
    #[must_use]
    pub fn stored(mission: &Mission, record: &DailyRecord) -> Self {
        if mission.uses_member_list() {
            Self::Members(record.member_count(&mission.id))
        } else {
            Self::Count(record.count(&mission.id))
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LimitDecision {
    Accept,
    Reject { current_total: u32, limit: u32 },
}

impl LimitDecision {
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// # Errors
    /// Returns [`MissionError::MonthlyLimitExceeded`] for a rejection.
    pub fn into_result(self, mission_id: &str) -> Result<(), MissionError> {
        match self {
            Self::Accept => Ok(()),
            Self::Reject {
                current_total,
                limit,
            } => Err(MissionError::MonthlyLimitExceeded {
                mission_id: mission_id.to_string(),
                current_total,
                limit,
            }),
        }
    }
}

/// Sums a mission's monthly usage for one department, in the mission's cap
/// unit, skipping the record dated `excluded_date`.
///
/// Missions without a cap always report zero.
#[must_use]
pub fn monthly_usage(
    records: &[DailyRecord],
    mission: &Mission,
    department: &str,
    excluded_date: Date,
) -> u32 {
    let Some(cap) = mission.monthly_cap() else {
        return 0;
    };

    records
        .iter()
        .filter(|record| record.department == department && record.date != excluded_date)
        .map(|record| Contribution::stored(mission, record).in_unit(cap.unit))
        .fold(0_u32, u32::saturating_add)
}

/// Checks whether storing `proposed` for `mission` on `date` keeps the
/// department inside the mission's monthly cap.
///
/// The month is read once through `store`; the check and a following write
/// are only atomic when both run inside [`RecordStore::exclusive`].
///
/// # Errors
/// Returns [`MissionError::Store`] when the month cannot be read.
pub fn check_monthly_limit<S: RecordStore>(
    store: &S,
    mission: &Mission,
    date: Date,
    department: &str,
    proposed: Contribution,
) -> Result<LimitDecision, MissionError> {
    let Some(cap) = mission.monthly_cap() else {
        return Ok(LimitDecision::Accept);
    };

    let month = DateRange::month_of(date);
    let records = store.query_range(month)?;
    let current_total = monthly_usage(&records, mission, department, date);
    let proposed_total = current_total.saturating_add(proposed.in_unit(cap.unit));

    if proposed_total > cap.limit {
        tracing::warn!(
            mission = %mission.id,
            department,
            month = %month,
            current_total,
            limit = cap.limit,
            "monthly limit would be exceeded"
        );
        return Ok(LimitDecision::Reject {
            current_total,
            limit: cap.limit,
        });
    }

    tracing::debug!(
        mission = %mission.id,
        department,
        current_total,
        proposed_total,
        limit = cap.limit,
        "monthly limit check passed"
    );
    Ok(LimitDecision::Accept)
}
