//! Document store contract consumed by the engine.
//!
//! # Invariants
//! - `put` fully replaces the document; omitted entries are gone afterwards.
//! - A record with no mission entries is never stored; `put` of an empty
//!   record behaves like `delete`.
//! - Range queries are inclusive and ordered by date, then department.

use std::sync::{Mutex, PoisonError};

use time::Date;
use tokio::sync::watch;

use crate::record::{DailyRecord, DateRange};
use crate::{StoreError, StoreResult};

pub trait RecordStore {
    fn get(&self, date: Date, department: &str) -> StoreResult<Option<DailyRecord>>;

    /// Replaces the document at `record.key()`.
    fn put(&self, record: &DailyRecord) -> StoreResult<()>;

    fn delete(&self, date: Date, department: &str) -> StoreResult<()>;

    fn query_range(&self, range: DateRange) -> StoreResult<Vec<DailyRecord>>;

    /// Opens a live feed of the full record set in `range`.
    ///
    /// The feed starts with the current record set and receives a fresh full
    /// set after every change inside the range.
    fn subscribe(&self, range: DateRange) -> StoreResult<RecordSubscription>;

    /// Fails when the store cannot accept writes at all.
    ///
    /// Mutations call this first, so a write that would turn out to be a
    /// no-op is still refused by a store that is not writable.
    fn ensure_writable(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Runs `op` as one read-modify-write unit where the backend supports it.
    ///
    /// The default runs `op` directly, which leaves a check-then-write window
    /// open to concurrent writers.
    fn exclusive<T, E, F>(&self, op: F) -> Result<T, E>
    where
        Self: Sized,
        E: From<StoreError>,
        F: FnOnce(&Self) -> Result<T, E>,
    {
        op(self)
    }
}

/// Consumer side of a store subscription.
///
/// Dropping it (or calling [`RecordSubscription::unsubscribe`]) stops future
/// deliveries.
#[derive(Debug)]
pub struct RecordSubscription {
    range: DateRange,
    receiver: watch::Receiver<Vec<DailyRecord>>,
}

impl RecordSubscription {
    #[must_use]
    pub fn new(range: DateRange, receiver: watch::Receiver<Vec<DailyRecord>>) -> Self {
        Self { range, receiver }
    }

    /// A subscription that delivers `records` once and never changes.
    #[must_use]
    pub fn closed(range: DateRange, records: Vec<DailyRecord>) -> Self {
        let (_, receiver) = watch::channel(records);
        Self { range, receiver }
    }

    #[must_use]
    pub fn range(&self) -> DateRange {
        self.range
    }

    /// The most recently delivered record set.
    #[must_use]
    pub fn current(&self) -> Vec<DailyRecord> {
        self.receiver.borrow().clone()
    }

    /// Waits for the next record set. Returns `None` once the store side has
    /// gone away.
    pub async fn changed(&mut self) -> Option<Vec<DailyRecord>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

#[derive(Debug)]
struct RangeWatcher {
    range: DateRange,
    sender: watch::Sender<Vec<DailyRecord>>,
}

/// Fan-out of full range snapshots for store implementations.
#[derive(Debug, Default)]
pub struct SubscriptionHub {
    watchers: Mutex<Vec<RangeWatcher>>,
}

impl SubscriptionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, range: DateRange, initial: Vec<DailyRecord>) -> RecordSubscription {
        let (sender, receiver) = watch::channel(initial);
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.push(RangeWatcher { range, sender });
        RecordSubscription::new(range, receiver)
    }

    /// Pushes a fresh record set to every live watcher whose range contains
    /// `changed`. Watchers whose consumer is gone are dropped.
    pub fn notify<F>(&self, changed: Date, mut load: F)
    where
        F: FnMut(DateRange) -> StoreResult<Vec<DailyRecord>>,
    {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|watcher| !watcher.sender.is_closed());

        for watcher in watchers.iter() {
            if !watcher.range.contains(changed) {
                continue;
            }
            match load(watcher.range) {
                Ok(records) => {
                    tracing::debug!(
                        range = %watcher.range,
                        records = records.len(),
                        "publishing record set"
                    );
                    let _ = watcher.sender.send_replace(records);
                }
                Err(err) => {
                    tracing::warn!(range = %watcher.range, error = %err, "failed to load record set for subscribers");
                }
            }
        }
    }

    #[must_use]
    pub fn live_subscribers(&self) -> usize {
        let watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers
            .iter()
            .filter(|watcher| !watcher.sender.is_closed())
            .count()
    }
}

pub const DEFAULT_REMEDIATION: &str =
    "no record store is configured; configure a database path to enable writes";

/// Degraded-mode store used when no backend is configured.
///
/// Reads succeed with no data; every write fails with
/// [`StoreError::Configuration`].
#[derive(Debug, Clone)]
pub struct UnconfiguredStore {
    remediation: String,
}

impl UnconfiguredStore {
    #[must_use]
    pub fn new(remediation: impl Into<String>) -> Self {
        Self {
            remediation: remediation.into(),
        }
    }

    fn refuse(&self, operation: &str) -> StoreError {
        tracing::warn!(operation, "write refused: record store is not configured");
        StoreError::Configuration(self.remediation.clone())
    }
}

impl Default for UnconfiguredStore {
    fn default() -> Self {
        Self::new(DEFAULT_REMEDIATION)
    }
}

impl RecordStore for UnconfiguredStore {
    fn get(&self, _date: Date, _department: &str) -> StoreResult<Option<DailyRecord>> {
        Ok(None)
    }

    fn put(&self, _record: &DailyRecord) -> StoreResult<()> {
        Err(self.refuse("put"))
    }

    fn delete(&self, _date: Date, _department: &str) -> StoreResult<()> {
        Err(self.refuse("delete"))
    }

    fn query_range(&self, _range: DateRange) -> StoreResult<Vec<DailyRecord>> {
        Ok(Vec::new())
    }

    fn subscribe(&self, range: DateRange) -> StoreResult<RecordSubscription> {
        Ok(RecordSubscription::closed(range, Vec::new()))
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        Err(self.refuse("write"))
    }
}
