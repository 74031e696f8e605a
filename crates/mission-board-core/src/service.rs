//! Mutation orchestration and read views over a [`RecordStore`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Date, Month};

use crate::aggregate::{aggregate, AggregateSnapshot};
use crate::catalog::{Mission, MissionCatalog};
use crate::limits::{check_monthly_limit, Contribution, LimitDecision};
use crate::record::{normalize_members, DailyRecord, DateRange};
use crate::scoring::{score_record, DayScore};
use crate::store::RecordStore;
use crate::{now_utc, MissionError, StoreError, StoreResult};

/// What a mutation did to the stored document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// The document was fully replaced with this record.
    Stored(DailyRecord),
    /// The last entry was cleared and the document removed.
    Deleted,
    /// No document existed and none was needed.
    Unchanged,
}

#[derive(Debug)]
pub struct MissionService<S> {
    store: Arc<S>,
    catalog: Arc<MissionCatalog>,
}

impl<S> Clone for MissionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<S: RecordStore> MissionService<S> {
    #[must_use]
    pub fn new(store: Arc<S>, catalog: Arc<MissionCatalog>) -> Self {
        Self { store, catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<MissionCatalog> {
        &self.catalog
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Sets the count of a counted mission; `0` removes the entry.
    ///
    /// # Errors
    /// - [`MissionError::Validation`] for a negative count, an unknown
    ///   department or mission, or a member-list mission.
    /// - [`MissionError::MonthlyLimitExceeded`] when the mission's cap would
    ///   be exceeded; the store is left unchanged.
    /// - [`MissionError::Store`] for any store failure.
    pub fn set_count(
        &self,
        date: Date,
        department: &str,
        mission_id: &str,
        count: i64,
    ) -> Result<MutationOutcome, MissionError> {
        self.require_department(department)?;
        let mission = self.require_mission(mission_id)?;
        if mission.uses_member_list() {
            return Err(MissionError::Validation(format!(
                "mission {mission_id} is tracked by member list; set its members instead"
            )));
        }
        let count = u32::try_from(count).map_err(|_| {
            MissionError::Validation(format!(
                "count for {mission_id} MUST be between 0 and {}, got {count}",
                u32::MAX
            ))
        })?;

        self.store.exclusive(|store| {
            store.ensure_writable()?;
            check_monthly_limit(store, mission, date, department, Contribution::Count(count))?
                .into_result(mission_id)?;

            let current = store.get(date, department)?;
            let mut next = current
                .clone()
                .unwrap_or_else(|| DailyRecord::new(date, department, now_utc()));
            next.meditation_members.remove(mission_id);
            if count == 0 {
                next.missions.remove(mission_id);
            } else {
                next.missions.insert(mission_id.to_string(), count);
            }
            commit(store, current.as_ref(), next)
        })
    }

    /// Replaces the member list of a member-list mission; an empty list
    /// removes the entry.
    ///
    /// # Errors
    /// Same as [`MissionService::set_count`], with blank member names and
    /// counted missions reported as [`MissionError::Validation`].
    pub fn set_members<I, T>(
        &self,
        date: Date,
        department: &str,
        mission_id: &str,
        members: I,
    ) -> Result<MutationOutcome, MissionError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.require_department(department)?;
        let mission = self.require_mission(mission_id)?;
        if !mission.uses_member_list() {
            return Err(MissionError::Validation(format!(
                "mission {mission_id} is counted; set its count instead"
            )));
        }
        let members = normalize_members(members)?;

        self.store.exclusive(|store| {
            store.ensure_writable()?;
            check_monthly_limit(
                store,
                mission,
                date,
                department,
                Contribution::Members(members.len()),
            )?
            .into_result(mission_id)?;

            let current = store.get(date, department)?;
            let mut next = current
                .clone()
                .unwrap_or_else(|| DailyRecord::new(date, department, now_utc()));
            next.missions.remove(mission_id);
            if members.is_empty() {
                next.meditation_members.remove(mission_id);
            } else {
                next.meditation_members
                    .insert(mission_id.to_string(), members.clone());
            }
            commit(store, current.as_ref(), next)
        })
    }

    /// Removes every entry for one department on one day.
    ///
    /// # Errors
    /// Returns [`MissionError::Store`] when the store refuses the delete.
    pub fn clear_day(&self, date: Date, department: &str) -> Result<MutationOutcome, MissionError> {
        self.require_department(department)?;
        self.store.exclusive(|store| {
            store.ensure_writable()?;
            let current = store.get(date, department)?;
            commit(
                store,
                current.as_ref(),
                DailyRecord::new(date, department, now_utc()),
            )
        })
    }

    /// Reports the cap decision for a proposed day value without writing.
    ///
    /// `proposed` is a count for counted missions and a member count for
    /// member-list missions.
    ///
    /// # Errors
    /// Returns [`MissionError::Validation`] for unknown ids and
    /// [`MissionError::Store`] when the month cannot be read.
    pub fn check_limit(
        &self,
        date: Date,
        department: &str,
        mission_id: &str,
        proposed: u32,
    ) -> Result<LimitDecision, MissionError> {
        self.require_department(department)?;
        let mission = self.require_mission(mission_id)?;
        let contribution = if mission.uses_member_list() {
            Contribution::Members(usize::try_from(proposed).unwrap_or(usize::MAX))
        } else {
            Contribution::Count(proposed)
        };
        check_monthly_limit(self.store.as_ref(), mission, date, department, contribution)
    }

    /// Point read; an unreachable store reads as no record.
    ///
    /// # Errors
    /// Returns [`MissionError::Store`] for failures other than a missing or
    /// unreachable store.
    pub fn record(&self, date: Date, department: &str) -> Result<Option<DailyRecord>, MissionError> {
        recover_read(self.store.get(date, department), "record")
    }

    /// # Errors
    /// See [`MissionService::record`].
    pub fn day_score(&self, date: Date, department: &str) -> Result<DayScore, MissionError> {
        let record = self
            .record(date, department)?
            .unwrap_or_else(|| DailyRecord::new(date, department, now_utc()));
        Ok(score_record(&record, &self.catalog))
    }

    /// # Errors
    /// See [`MissionService::record`].
    pub fn range_scores(&self, range: DateRange) -> Result<AggregateSnapshot, MissionError> {
        let records = recover_read(self.store.query_range(range), "range")?;
        tracing::debug!(range = %range, records = records.len(), "aggregating range");
        Ok(aggregate(range, &records, &self.catalog))
    }

    /// # Errors
    /// Returns [`MissionError::Validation`] for an out-of-range year, or see
    /// [`MissionService::record`].
    pub fn month_scores(&self, year: i32, month: Month) -> Result<AggregateSnapshot, MissionError> {
        self.range_scores(DateRange::month(year, month)?)
    }

    /// # Errors
    /// See [`MissionService::record`].
    pub fn all_time_scores(&self) -> Result<AggregateSnapshot, MissionError> {
        self.range_scores(DateRange::all())
    }

    fn require_mission(&self, mission_id: &str) -> Result<&Mission, MissionError> {
        self.catalog
            .mission(mission_id)
            .ok_or_else(|| MissionError::Validation(format!("unknown mission: {mission_id}")))
    }

    fn require_department(&self, department: &str) -> Result<(), MissionError> {
        if self.catalog.department(department).is_none() {
            return Err(MissionError::Validation(format!(
                "unknown department: {department}"
            )));
        }
        Ok(())
    }
}

/// Writes the fully replaced record, deletes an emptied one, or skips a
/// no-op on an absent document. Callers have already checked that the store
/// accepts writes.
fn commit<S: RecordStore>(
    store: &S,
    current: Option<&DailyRecord>,
    mut next: DailyRecord,
) -> Result<MutationOutcome, MissionError> {
    if next.is_empty() {
        if current.is_none() {
            return Ok(MutationOutcome::Unchanged);
        }
        store.delete(next.date, &next.department)?;
        tracing::info!(key = %next.key(), "record deleted");
        return Ok(MutationOutcome::Deleted);
    }

    next.updated_at = now_utc();
    next.validate()?;
    store.put(&next)?;
    tracing::info!(
        key = %next.key(),
        missions = next.missions.len(),
        member_lists = next.meditation_members.len(),
        "record stored"
    );
    Ok(MutationOutcome::Stored(next))
}

/// Read-path recovery: an unconfigured or unreachable store reads as empty.
fn recover_read<T: Default>(result: StoreResult<T>, what: &str) -> Result<T, MissionError> {
    match result {
        Ok(value) => Ok(value),
        Err(err @ (StoreError::Configuration(_) | StoreError::Transport(_))) => {
            tracing::warn!(read = what, error = %err, "store read failed; treating as empty");
            Ok(T::default())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UnconfiguredStore;
    use crate::testing::{must, must_some, MemoryStore};
    use time::macros::date;

    fn service(store: MemoryStore) -> MissionService<MemoryStore> {
        MissionService::new(Arc::new(store), Arc::new(MissionCatalog::standard()))
    }

    fn stored(outcome: MutationOutcome) -> DailyRecord {
        match outcome {
            MutationOutcome::Stored(record) => record,
            other => panic!("expected stored record, got {other:?}"),
        }
    }

    #[test]
    fn first_count_creates_the_record() {
        let service = service(MemoryStore::default());
        let record = stored(must(service.set_count(
            date!(2026 - 02 - 07),
            "sarang",
            "testimony",
            2,
        )));
        assert_eq!(record.count("testimony"), 2);
        assert_eq!(record.key(), "2026-02-07_sarang");

        let read = must_some(
            must(service.record(date!(2026 - 02 - 07), "sarang")),
            "record should exist",
        );
        assert_eq!(read.missions, record.missions);
    }

    #[test]
    fn zeroing_an_entry_replaces_the_document() {
        let service = service(MemoryStore::default());
        must(service.set_count(date!(2026 - 02 - 07), "sarang", "testimony", 2));
        must(service.set_count(date!(2026 - 02 - 07), "sarang", "service", 1));

        let record = stored(must(service.set_count(
            date!(2026 - 02 - 07),
            "sarang",
            "testimony",
            0,
        )));
        assert!(!record.missions.contains_key("testimony"));

        let read = must_some(
            must(service.record(date!(2026 - 02 - 07), "sarang")),
            "record should exist",
        );
        assert_eq!(read.missions.len(), 1);
        assert_eq!(read.count("service"), 1);
    }

    #[test]
    fn clearing_the_last_entry_deletes_the_record() {
        let service = service(MemoryStore::default());
        must(service.set_members(date!(2026 - 02 - 07), "hana", "evangelism", ["kim"]));

        let outcome = must(service.set_members(
            date!(2026 - 02 - 07),
            "hana",
            "evangelism",
            Vec::<String>::new(),
        ));
        assert_eq!(outcome, MutationOutcome::Deleted);
        assert!(must(service.record(date!(2026 - 02 - 07), "hana")).is_none());
        assert_eq!(must(service.day_score(date!(2026 - 02 - 07), "hana")).total, 0);
    }

    #[test]
    fn zero_on_an_absent_record_touches_nothing() {
        let store = MemoryStore::default();
        let service = service(store);
        let outcome = must(service.set_count(date!(2026 - 02 - 07), "hana", "service", 0));
        assert_eq!(outcome, MutationOutcome::Unchanged);
        assert_eq!(service.store().writes(), 0);
    }

    #[test]
    fn negative_counts_are_rejected_before_the_store() {
        let service = service(MemoryStore::default());
        let err = match service.set_count(date!(2026 - 02 - 07), "sarang", "testimony", -1) {
            Err(err) => err,
            Ok(outcome) => panic!("expected rejection, got {outcome:?}"),
        };
        assert!(matches!(err, MissionError::Validation(_)));
        assert_eq!(service.store().writes(), 0);
    }

    #[test]
    fn unknown_ids_and_wrong_mission_kinds_are_rejected() {
        let service = service(MemoryStore::default());
        let day = date!(2026 - 02 - 07);
        assert!(matches!(
            service.set_count(day, "choir", "testimony", 1),
            Err(MissionError::Validation(_))
        ));
        assert!(matches!(
            service.set_count(day, "sarang", "retired", 1),
            Err(MissionError::Validation(_))
        ));
        assert!(matches!(
            service.set_count(day, "sarang", "evangelism", 1),
            Err(MissionError::Validation(_))
        ));
        assert!(matches!(
            service.set_members(day, "sarang", "testimony", ["kim"]),
            Err(MissionError::Validation(_))
        ));
        assert!(matches!(
            service.set_members(day, "sarang", "evangelism", ["  "]),
            Err(MissionError::Validation(_))
        ));
    }

    #[test]
    fn monthly_limit_rejection_leaves_the_day_unchanged() {
        let service = service(MemoryStore::default());
        must(service.set_members(date!(2026 - 02 - 01), "sarang", "department-visit", ["a"]));
        must(service.set_members(date!(2026 - 02 - 08), "sarang", "department-visit", ["b", "c"]));
        must(service.set_count(date!(2026 - 02 - 15), "sarang", "testimony", 1));
        let before = must(service.record(date!(2026 - 02 - 15), "sarang"));

        match service.set_members(date!(2026 - 02 - 15), "sarang", "department-visit", ["d"]) {
            Err(MissionError::MonthlyLimitExceeded {
                mission_id,
                current_total,
                limit,
            }) => {
                assert_eq!(mission_id, "department-visit");
                assert_eq!(current_total, 2);
                assert_eq!(limit, 2);
            }
            other => panic!("expected monthly limit error, got {other:?}"),
        }
        assert_eq!(must(service.record(date!(2026 - 02 - 15), "sarang")), before);

        // Next month starts from zero.
        must(service.set_members(date!(2026 - 03 - 01), "sarang", "department-visit", ["d"]));
    }

    #[test]
    fn member_lists_are_normalized_on_write() {
        let service = service(MemoryStore::default());
        let record = stored(must(service.set_members(
            date!(2026 - 02 - 07),
            "sarang",
            "meditation-share",
            [" kim", "lee", "kim "],
        )));
        assert_eq!(record.member_count("meditation-share"), 2);
    }

    #[test]
    fn check_limit_interprets_proposed_per_mission_kind() {
        let service = service(MemoryStore::default());
        must(service.set_members(date!(2026 - 02 - 01), "sarang", "department-visit", ["a"]));

        let decision = must(service.check_limit(
            date!(2026 - 02 - 02),
            "sarang",
            "department-visit",
            5,
        ));
        assert!(decision.is_accept());
    }

    #[test]
    fn month_and_all_time_views_aggregate_records() {
        let service = service(MemoryStore::default());
        must(service.set_count(date!(2026 - 01 - 31), "sarang", "service", 4));
        must(service.set_count(date!(2026 - 02 - 07), "hana", "service", 2));

        let february = must(service.month_scores(2026, Month::February));
        assert_eq!(february.total("sarang"), 0);
        assert_eq!(february.total("hana"), 2);

        let all = must(service.all_time_scores());
        assert_eq!(all.total("sarang"), 4);
        assert_eq!(all.record_count, 2);
    }

    #[test]
    fn unconfigured_store_reads_empty_and_surfaces_write_errors() {
        let service = MissionService::new(
            Arc::new(UnconfiguredStore::new("configure a database")),
            Arc::new(MissionCatalog::standard()),
        );
        assert_eq!(must(service.all_time_scores()).record_count, 0);
        assert_eq!(must(service.day_score(date!(2026 - 02 - 07), "sarang")).total, 0);

        let err = match service.set_count(date!(2026 - 02 - 07), "sarang", "service", 1) {
            Err(err) => err,
            Ok(outcome) => panic!("expected configuration error, got {outcome:?}"),
        };
        assert_eq!(err.code(), "store.configuration");
        assert!(err.to_string().contains("configure a database"));
    }

    #[test]
    fn unconfigured_store_refuses_writes_that_would_change_nothing() {
        let service = MissionService::new(
            Arc::new(UnconfiguredStore::new("configure a database")),
            Arc::new(MissionCatalog::standard()),
        );
        let day = date!(2026 - 02 - 07);
        let attempts = [
            ("clear_day", service.clear_day(day, "sarang")),
            ("set_count 0", service.set_count(day, "sarang", "testimony", 0)),
            (
                "set_members []",
                service.set_members(day, "sarang", "evangelism", Vec::<String>::new()),
            ),
        ];
        for (label, result) in attempts {
            match result {
                Err(err) => assert_eq!(err.code(), "store.configuration", "{label}"),
                Ok(outcome) => panic!("{label} succeeded without a store: {outcome:?}"),
            }
        }
    }

    #[test]
    fn transport_failures_read_as_empty_and_surface_on_writes() {
        let store = MemoryStore::default();
        let service = service(store);
        must(service.set_count(date!(2026 - 02 - 07), "sarang", "service", 3));
        service.store().disconnect();

        assert!(must(service.record(date!(2026 - 02 - 07), "sarang")).is_none());
        let scores = must(service.range_scores(DateRange::all()));
        assert_eq!(scores.record_count, 0);
        assert_eq!(scores.standing, crate::aggregate::Standing::NoScores);
        assert_eq!(must(service.day_score(date!(2026 - 02 - 07), "sarang")).total, 0);

        let err = match service.set_count(date!(2026 - 02 - 07), "sarang", "service", 1) {
            Err(err) => err,
            Ok(outcome) => panic!("expected transport error, got {outcome:?}"),
        };
        assert_eq!(err.code(), "store.transport");
        assert!(!err.is_rejection());
    }

    #[test]
    fn permission_errors_are_surfaced_on_writes() {
        let store = MemoryStore::default();
        store.deny_writes();
        let service = service(store);
        let err = match service.set_count(date!(2026 - 02 - 07), "sarang", "service", 1) {
            Err(err) => err,
            Ok(outcome) => panic!("expected permission error, got {outcome:?}"),
        };
        assert_eq!(err.code(), "store.permission");
    }
}
