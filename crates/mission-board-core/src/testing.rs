use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use time::Date;

use crate::record::{record_key, DailyRecord, DateRange};
use crate::store::{RecordStore, RecordSubscription, SubscriptionHub};
use crate::{StoreError, StoreResult};

/// In-memory document store for unit tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, DailyRecord>>,
    hub: SubscriptionHub,
    deny_writes: AtomicBool,
    unreachable: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn with_records(records: impl IntoIterator<Item = DailyRecord>) -> Self {
        let store = Self::default();
        for record in records {
            store.lock().insert(record.key(), record);
        }
        store
    }

    pub fn deny_writes(&self) {
        self.deny_writes.store(true, Ordering::SeqCst);
    }

    /// Every later call fails with [`StoreError::Transport`].
    pub fn disconnect(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn live_subscribers(&self) -> usize {
        self.hub.live_subscribers()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, DailyRecord>> {
        self.documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("store is unreachable".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.ensure_writable()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn publish(&self, date: Date) {
        self.hub.notify(date, |range| self.query_range(range));
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, date: Date, department: &str) -> StoreResult<Option<DailyRecord>> {
        self.check_reachable()?;
        Ok(self.lock().get(&record_key(date, department)).cloned())
    }

    fn put(&self, record: &DailyRecord) -> StoreResult<()> {
        if record.is_empty() {
            return self.delete(record.date, &record.department);
        }
        self.check_writable()?;
        self.lock().insert(record.key(), record.clone());
        self.publish(record.date);
        Ok(())
    }

    fn delete(&self, date: Date, department: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.lock().remove(&record_key(date, department));
        self.publish(date);
        Ok(())
    }

    fn query_range(&self, range: DateRange) -> StoreResult<Vec<DailyRecord>> {
        self.check_reachable()?;
        Ok(self
            .lock()
            .values()
            .filter(|record| range.contains(record.date))
            .cloned()
            .collect())
    }

    fn subscribe(&self, range: DateRange) -> StoreResult<RecordSubscription> {
        let initial = self.query_range(range)?;
        Ok(self.hub.register(range, initial))
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        self.check_reachable()?;
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Permission("store is read-only".to_string()));
        }
        Ok(())
    }
}

pub fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("expected Ok(..), got error: {err}"),
    }
}

pub fn must_some<T>(value: Option<T>, context: &str) -> T {
    match value {
        Some(inner) => inner,
        None => panic!("expected Some(..): {context}"),
    }
}
