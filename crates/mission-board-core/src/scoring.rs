//! Pure per-record scoring.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::catalog::{Mission, MissionCatalog, Tally};
use crate::record::{date_serde, DailyRecord};

/// Points one mission earned on one record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionScore {
    pub mission_id: String,
    /// Tally that produced the points: list length or stored count.
    pub count: u32,
    pub points: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayScore {
    #[serde(with = "date_serde")]
    pub date: Date,
    pub department: String,
    pub total: u64,
    /// Missions that earned points, in catalog order.
    pub breakdown: Vec<MissionScore>,
}

/// Applies one mission's rule to a record and returns `(count, points)`.
///
/// Modifiers apply in a fixed order: eligibility window, count source,
/// threshold, tally.
#[must_use]
pub fn mission_points(mission: &Mission, record: &DailyRecord) -> (u32, u64) {
    if !mission.eligible_on(record.date) {
        return (0, 0);
    }

    let count = if mission.uses_member_list() {
        u32::try_from(record.member_count(&mission.id)).unwrap_or(u32::MAX)
    } else {
        record.count(&mission.id)
    };

    let points = u64::from(mission.points);

    if let Some(min_members) = mission.threshold() {
        let met = usize::try_from(count).unwrap_or(usize::MAX) >= min_members;
        return (count, if met { points } else { 0 });
    }

    // Member lists always score per listed member.
    let tally = if mission.uses_member_list() {
        Tally::PerUnit
    } else {
        mission.tally
    };

    let earned = match tally {
        Tally::PerUnit => points * u64::from(count),
        Tally::OncePerDay if count > 0 => points,
        Tally::OncePerDay => 0,
    };

    (count, earned)
}

/// Scores one record against the catalog.
///
/// `total` always equals the sum of `breakdown`; entries for ids the catalog
/// does not define are ignored.
#[must_use]
pub fn score_record(record: &DailyRecord, catalog: &MissionCatalog) -> DayScore {
    let mut total = 0_u64;
    let mut breakdown = Vec::new();

    for mission in catalog.missions() {
        let (count, points) = mission_points(mission, record);
        if points > 0 {
            total = total.saturating_add(points);
            breakdown.push(MissionScore {
                mission_id: mission.id.clone(),
                count,
                points,
            });
        }
    }

    DayScore {
        date: record.date,
        department: record.department.clone(),
        total,
        breakdown,
    }
}

/// Daily total where a missing record scores zero.
#[must_use]
pub fn daily_total(record: Option<&DailyRecord>, catalog: &MissionCatalog) -> u64 {
    record.map_or(0, |value| score_record(value, catalog).total)
}
