//! Range aggregates, scoreboard standing and per-mission comparisons.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::catalog::MissionCatalog;
use crate::record::{format_date, DailyRecord, DateRange};
use crate::scoring::score_record;

/// Scoreboard outcome between the two contestants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", content = "department", rename_all = "snake_case")]
pub enum Standing {
    Winner(String),
    /// Equal totals above zero.
    Tie,
    /// Both totals are zero: neither a winner nor a tie.
    NoScores,
}

impl Standing {
    #[must_use]
    pub fn between(first: (&str, u64), second: (&str, u64)) -> Self {
        let (first_id, first_total) = first;
        let (second_id, second_total) = second;
        match first_total.cmp(&second_total) {
            std::cmp::Ordering::Greater => Self::Winner(first_id.to_string()),
            std::cmp::Ordering::Less => Self::Winner(second_id.to_string()),
            std::cmp::Ordering::Equal if first_total > 0 => Self::Tie,
            std::cmp::Ordering::Equal => Self::NoScores,
        }
    }

    #[must_use]
    pub fn winner(&self) -> Option<&str> {
        match self {
            Self::Winner(department) => Some(department),
            Self::Tie | Self::NoScores => None,
        }
    }
}

impl Display for Standing {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Winner(department) => write!(f, "{department} leads"),
            Self::Tie => write!(f, "tie"),
            Self::NoScores => write!(f, "no scores yet"),
        }
    }
}

/// Fully recomputed totals for one date range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateSnapshot {
    /// Publish counter; `0` for a snapshot computed outside a projection.
    pub generation: u64,
    pub range: DateRange,
    pub record_count: usize,
    /// Every catalog department, zero when it has no records.
    pub department_totals: BTreeMap<String, u64>,
    /// department → mission id → points; only non-zero entries.
    pub mission_totals: BTreeMap<String, BTreeMap<String, u64>>,
    /// `yyyy-MM-dd` → department → points.
    pub daily_totals: BTreeMap<String, BTreeMap<String, u64>>,
    pub standing: Standing,
}

impl AggregateSnapshot {
    #[must_use]
    pub fn total(&self, department: &str) -> u64 {
        self.department_totals.get(department).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn mission_total(&self, department: &str, mission_id: &str) -> u64 {
        self.mission_totals
            .get(department)
            .and_then(|missions| missions.get(mission_id))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }
}

/// Sums the score of every record inside `range`.
///
/// Records outside `range` are skipped so a store returning a superset cannot
/// skew the totals.
#[must_use]
pub fn aggregate(
    range: DateRange,
    records: &[DailyRecord],
    catalog: &MissionCatalog,
) -> AggregateSnapshot {
    let mut department_totals: BTreeMap<String, u64> = catalog
        .departments()
        .iter()
        .map(|department| (department.id.clone(), 0))
        .collect();
    let mut mission_totals: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    let mut daily_totals: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    let mut record_count = 0;

    for record in records.iter().filter(|record| range.contains(record.date)) {
        record_count += 1;
        let score = score_record(record, catalog);

        add_points(
            department_totals.entry(record.department.clone()).or_insert(0),
            score.total,
        );
        add_points(
            daily_totals
                .entry(format_date(record.date))
                .or_default()
                .entry(record.department.clone())
                .or_insert(0),
            score.total,
        );

        let per_mission = mission_totals.entry(record.department.clone()).or_default();
        for entry in score.breakdown {
            add_points(per_mission.entry(entry.mission_id).or_insert(0), entry.points);
        }
    }

    let (first, second) = catalog.contestants();
    let standing = Standing::between(
        (&first.id, department_totals.get(&first.id).copied().unwrap_or(0)),
        (&second.id, department_totals.get(&second.id).copied().unwrap_or(0)),
    );

    AggregateSnapshot {
        generation: 0,
        range,
        record_count,
        department_totals,
        mission_totals,
        daily_totals,
        standing,
    }
}

fn add_points(total: &mut u64, points: u64) {
    *total = total.saturating_add(points);
}

/// One row of the "who is ahead" table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionComparison {
    pub mission_id: String,
    pub name: String,
    pub first: u64,
    pub second: u64,
    /// `first - second`.
    pub difference: i64,
}

impl MissionComparison {
    #[must_use]
    pub fn formatted_difference(&self) -> String {
        format_difference(self.difference)
    }
}

/// Compares both contestants mission by mission, in catalog order.
#[must_use]
pub fn compare_missions(
    snapshot: &AggregateSnapshot,
    catalog: &MissionCatalog,
) -> Vec<MissionComparison> {
    let (first, second) = catalog.contestants();
    catalog
        .missions()
        .iter()
        .map(|mission| {
            let first_points = snapshot.mission_total(&first.id, &mission.id);
            let second_points = snapshot.mission_total(&second.id, &mission.id);
            MissionComparison {
                mission_id: mission.id.clone(),
                name: mission.name.clone(),
                first: first_points,
                second: second_points,
                difference: signed_difference(first_points, second_points),
            }
        })
        .collect()
}

fn signed_difference(first: u64, second: u64) -> i64 {
    let as_signed = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
    as_signed(first).saturating_sub(as_signed(second))
}

/// Renders a difference as `+n`, `-n`, or a bare `0`.
#[must_use]
pub fn format_difference(difference: i64) -> String {
    match difference {
        0 => "0".to_string(),
        positive if positive > 0 => format!("+{positive}"),
        negative => negative.to_string(),
    }
}
