//! Live aggregate snapshots over store subscriptions.
//!
//! Every store notification carries the complete record set for the range;
//! the projector recomputes a whole [`AggregateSnapshot`] from it and replaces
//! the previous one. Consumers never see a partially applied change.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::aggregate::{aggregate, AggregateSnapshot};
use crate::catalog::MissionCatalog;
use crate::record::DateRange;
use crate::store::RecordStore;
use crate::MissionError;

#[derive(Debug)]
pub struct SubscriptionProjector<S> {
    store: Arc<S>,
    catalog: Arc<MissionCatalog>,
}

impl<S: RecordStore> SubscriptionProjector<S> {
    #[must_use]
    pub fn new(store: Arc<S>, catalog: Arc<MissionCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Starts a live projection of `range`.
    ///
    /// The first snapshot is computed before this returns; later snapshots
    /// are published by a task on the current Tokio runtime.
    ///
    /// # Errors
    /// Returns [`MissionError::Configuration`] outside a Tokio runtime and
    /// [`MissionError::Store`] when the store refuses the subscription.
    pub fn project(&self, range: DateRange) -> Result<Projection, MissionError> {
        let handle = Handle::try_current().map_err(|err| {
            MissionError::Configuration(format!(
                "live projections require a Tokio runtime: {err}"
            ))
        })?;

        let mut subscription = self.store.subscribe(range)?;
        let initial = aggregate(range, &subscription.current(), &self.catalog).with_generation(1);
        tracing::debug!(
            range = %range,
            records = initial.record_count,
            "projection started"
        );

        let (sender, receiver) = watch::channel(initial);
        let active = Arc::new(Mutex::new(true));
        let task_active = Arc::clone(&active);
        let catalog = Arc::clone(&self.catalog);

        let task = handle.spawn(async move {
            let mut generation = 1_u64;
            while let Some(records) = subscription.changed().await {
                let snapshot = aggregate(range, &records, &catalog);

                let active = task_active.lock().unwrap_or_else(PoisonError::into_inner);
                if !*active {
                    break;
                }
                generation += 1;
                tracing::debug!(
                    range = %range,
                    generation,
                    records = snapshot.record_count,
                    "publishing aggregate snapshot"
                );
                sender.send_replace(snapshot.with_generation(generation));
            }
            tracing::debug!(range = %range, "projection stopped");
        });

        Ok(Projection {
            range,
            receiver,
            active,
            task,
        })
    }
}

/// Handle to one live projection.
///
/// Dropping the projection has the same effect as
/// [`Projection::unsubscribe`].
#[derive(Debug)]
pub struct Projection {
    range: DateRange,
    receiver: watch::Receiver<AggregateSnapshot>,
    active: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl Projection {
    #[must_use]
    pub fn range(&self) -> DateRange {
        self.range
    }

    #[must_use]
    pub fn latest(&self) -> AggregateSnapshot {
        self.receiver.borrow().clone()
    }

    /// Registers another consumer. The receiver starts at the latest
    /// snapshot and reports closed once the projection stops.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AggregateSnapshot> {
        self.receiver.clone()
    }

    /// Stops the projection. No snapshot is published after this returns,
    /// including one whose recomputation was already under way.
    pub fn unsubscribe(self) {}

    fn stop(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = false;
        self.task.abort();
    }
}

impl Drop for Projection {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Standing;
    use crate::record::DailyRecord;
    use crate::testing::{must, MemoryStore};
    use time::macros::{date, datetime};
    use time::Date;

    fn service(date: Date, department: &str, count: u32) -> DailyRecord {
        let mut record = DailyRecord::new(date, department, datetime!(2026-02-07 12:00 UTC));
        record.missions.insert("service".to_string(), count);
        record
    }

    fn projector(store: &Arc<MemoryStore>) -> SubscriptionProjector<MemoryStore> {
        SubscriptionProjector::new(Arc::clone(store), Arc::new(MissionCatalog::standard()))
    }

    #[test]
    fn projecting_outside_a_runtime_is_a_configuration_error() {
        let store = Arc::new(MemoryStore::default());
        match projector(&store).project(DateRange::all()) {
            Err(MissionError::Configuration(message)) => assert!(message.contains("Tokio")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn initial_snapshot_reflects_current_records() {
        let store = Arc::new(MemoryStore::with_records([service(
            date!(2026 - 02 - 07),
            "sarang",
            3,
        )]));
        let projection = must(projector(&store).project(DateRange::all()));
        let snapshot = projection.latest();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.total("sarang"), 3);
        assert_eq!(snapshot.standing, Standing::Winner("sarang".to_string()));
    }

    #[tokio::test]
    async fn every_change_publishes_a_full_recomputation() {
        let store = Arc::new(MemoryStore::with_records([service(
            date!(2026 - 02 - 07),
            "sarang",
            3,
        )]));
        let projection = must(projector(&store).project(DateRange::all()));
        let mut consumer = projection.subscribe();

        must(store.put(&service(date!(2026 - 02 - 08), "hana", 3)));
        must(consumer.changed().await);
        let snapshot = consumer.borrow_and_update().clone();

        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.total("sarang"), 3);
        assert_eq!(snapshot.total("hana"), 3);
        assert_eq!(snapshot.standing, Standing::Tie);
        assert_eq!(projection.latest(), snapshot);
    }

    #[tokio::test]
    async fn changes_outside_the_range_are_not_published() {
        let store = Arc::new(MemoryStore::default());
        let february = must(DateRange::month(2026, time::Month::February));
        let projection = must(projector(&store).project(february));

        must(store.put(&service(date!(2026 - 03 - 01), "hana", 2)));
        tokio::task::yield_now().await;

        assert_eq!(projection.latest().generation, 1);
        assert_eq!(projection.latest().total("hana"), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_without_touching_other_projections() {
        let store = Arc::new(MemoryStore::default());
        let projector = projector(&store);
        let monthly = must(projector.project(must(DateRange::month(2026, time::Month::February))));
        let all_time = must(projector.project(DateRange::all()));
        let mut monthly_consumer = monthly.subscribe();
        let mut all_time_consumer = all_time.subscribe();

        monthly.unsubscribe();
        must(store.put(&service(date!(2026 - 02 - 07), "sarang", 1)));

        assert!(monthly_consumer.changed().await.is_err());
        assert_eq!(monthly_consumer.borrow().generation, 1);

        must(all_time_consumer.changed().await);
        assert_eq!(all_time_consumer.borrow().total("sarang"), 1);
        assert_eq!(store.live_subscribers(), 1);
    }
}
