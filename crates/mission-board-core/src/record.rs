//! Stored per-day, per-department check-in documents.
//!
//! # Invariants
//! - A mission id never appears in both `missions` and `meditation_members`.
//! - Counts are positive and member lists non-empty; absence means zero.
//! - A record with both maps empty is never persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime};

use crate::MissionError;

/// Formats a date as zero-padded `yyyy-MM-dd` so lexical order matches
/// chronological order.
#[must_use]
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parses a zero-padded `yyyy-MM-dd` date.
///
/// # Errors
/// Returns [`MissionError::Validation`] when the input is not a valid
/// calendar date in that format.
pub fn parse_date(value: &str) -> Result<Date, MissionError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|err| MissionError::Validation(format!("invalid date `{value}`: {err}")))
}

/// Parses a `yyyy-MM` month selector.
///
/// # Errors
/// Returns [`MissionError::Validation`] for malformed input.
pub fn parse_year_month(value: &str) -> Result<(i32, Month), MissionError> {
    let invalid = || MissionError::Validation(format!("month must be yyyy-MM, got `{value}`"));
    let (year_raw, month_raw) = value.trim().split_once('-').ok_or_else(invalid)?;
    if year_raw.len() != 4 || month_raw.len() != 2 {
        return Err(invalid());
    }
    let year: i32 = year_raw.parse().map_err(|_| invalid())?;
    let month_number: u8 = month_raw.parse().map_err(|_| invalid())?;
    let month = Month::try_from(month_number).map_err(|_| invalid())?;
    Ok((year, month))
}

/// Document key: `"{date}_{department}"`.
#[must_use]
pub fn record_key(date: Date, department: &str) -> String {
    format!("{}_{department}", format_date(date))
}

pub(crate) mod date_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(value) => serializer.serialize_some(&super::super::format_date(*value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|value| super::super::parse_date(&value).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    #[serde(with = "date_serde")]
    pub date: Date,
    pub department: String,
    #[serde(default)]
    pub missions: BTreeMap<String, u32>,
    /// Member lists keyed by mission id, for every member-list mission.
    #[serde(default)]
    pub meditation_members: BTreeMap<String, BTreeSet<String>>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DailyRecord {
    #[must_use]
    pub fn new(date: Date, department: impl Into<String>, updated_at: OffsetDateTime) -> Self {
        Self {
            date,
            department: department.into(),
            missions: BTreeMap::new(),
            meditation_members: BTreeMap::new(),
            updated_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        record_key(self.date, &self.department)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missions.is_empty() && self.meditation_members.is_empty()
    }

    /// Stored count for a counted mission, zero when absent.
    #[must_use]
    pub fn count(&self, mission_id: &str) -> u32 {
        self.missions.get(mission_id).copied().unwrap_or(0)
    }

    /// Member-list length for a member-list mission, zero when absent.
    #[must_use]
    pub fn member_count(&self, mission_id: &str) -> usize {
        self.meditation_members
            .get(mission_id)
            .map_or(0, BTreeSet::len)
    }

    #[must_use]
    pub fn members(&self, mission_id: &str) -> Option<&BTreeSet<String>> {
        self.meditation_members.get(mission_id)
    }

    /// Checks the storage invariants of a record.
    ///
    /// # Errors
    /// Returns [`MissionError::Validation`] naming the first violation.
    pub fn validate(&self) -> Result<(), MissionError> {
        if self.department.trim().is_empty() {
            return Err(MissionError::Validation(
                "department MUST be non-empty".to_string(),
            ));
        }

        for (mission_id, count) in &self.missions {
            if *count == 0 {
                return Err(MissionError::Validation(format!(
                    "mission {mission_id} has a zero count; absent entries mean zero"
                )));
            }
            if self.meditation_members.contains_key(mission_id) {
                return Err(MissionError::Validation(format!(
                    "mission {mission_id} appears in both missions and meditationMembers"
                )));
            }
        }

        for (mission_id, members) in &self.meditation_members {
            if members.is_empty() {
                return Err(MissionError::Validation(format!(
                    "mission {mission_id} has an empty member list; absent entries mean zero"
                )));
            }
            if members.iter().any(|name| name.trim().is_empty()) {
                return Err(MissionError::Validation(format!(
                    "mission {mission_id} has an empty member name"
                )));
            }
        }

        Ok(())
    }
}

/// Trims names, drops duplicates and rejects blank entries.
///
/// # Errors
/// Returns [`MissionError::Validation`] when a name is blank.
pub fn normalize_members<I, S>(members: I) -> Result<BTreeSet<String>, MissionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = BTreeSet::new();
    for member in members {
        let trimmed = member.as_ref().trim();
        if trimmed.is_empty() {
            return Err(MissionError::Validation(
                "member names MUST be non-empty".to_string(),
            ));
        }
        normalized.insert(trimmed.to_string());
    }
    Ok(normalized)
}

/// Inclusive date range; an open end is unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    #[serde(default, with = "date_serde::option")]
    pub start: Option<Date>,
    #[serde(default, with = "date_serde::option")]
    pub end: Option<Date>,
}

impl DateRange {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn day(date: Date) -> Self {
        Self {
            start: Some(date),
            end: Some(date),
        }
    }

    #[must_use]
    pub fn between(start: Date, end: Date) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The calendar month containing `date`.
    #[must_use]
    pub fn month_of(date: Date) -> Self {
        let first = date.saturating_sub(Duration::days(i64::from(date.day()) - 1));
        let days = date.month().length(date.year());
        let last = first.saturating_add(Duration::days(i64::from(days) - 1));
        Self::between(first, last)
    }

    /// # Errors
    /// Returns [`MissionError::Validation`] when the year is out of range.
    pub fn month(year: i32, month: Month) -> Result<Self, MissionError> {
        let first = Date::from_calendar_date(year, month, 1).map_err(|err| {
            MissionError::Validation(format!("invalid month {year}-{month}: {err}"))
        })?;
        Ok(Self::month_of(first))
    }

    #[must_use]
    pub fn contains(&self, date: Date) -> bool {
        let after_start = match self.start {
            Some(start) => date >= start,
            None => true,
        };
        let before_end = match self.end {
            Some(end) => date <= end,
            None => true,
        };
        after_start && before_end
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_unbounded() {
            return write!(f, "all");
        }
        let start = self.start.map_or_else(|| "*".to_string(), format_date);
        let end = self.end.map_or_else(|| "*".to_string(), format_date);
        write!(f, "{start}..={end}")
    }
}
