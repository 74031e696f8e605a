#![allow(clippy::missing_errors_doc)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use mission_board_core::{
    format_date, format_rfc3339, now_utc, parse_date, parse_rfc3339_utc, record_key, DailyRecord,
    DateRange, RecordStore, RecordSubscription, StoreError, StoreResult, SubscriptionHub,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use time::Date;

const RECORDS_MIGRATION_VERSION: i64 = 1;

const SCHEMA_RECORDS_V1: &str = r"
CREATE TABLE IF NOT EXISTS mission_records (
  record_key TEXT PRIMARY KEY,
  date TEXT NOT NULL CHECK (length(date) = 10),
  department TEXT NOT NULL CHECK (length(department) > 0),
  missions_json TEXT NOT NULL DEFAULT '{}',
  members_json TEXT NOT NULL DEFAULT '{}',
  updated_at TEXT NOT NULL,
  UNIQUE(date, department)
);

CREATE TRIGGER IF NOT EXISTS trg_mission_records_key_immutable
BEFORE UPDATE OF date, department ON mission_records
BEGIN
  SELECT RAISE(FAIL, 'record date and department are immutable');
END;

CREATE INDEX IF NOT EXISTS idx_mission_records_date_department
  ON mission_records(date, department);
";

const SELECT_RECORD_COLUMNS: &str =
    "SELECT date, department, missions_json, members_json, updated_at FROM mission_records";

/// Document store for daily records backed by one SQLite connection.
///
/// Writes fully replace the stored document. Live subscriptions are notified
/// after every committed change inside their range.
pub struct SqliteRecordStore {
    conn: Connection,
    hub: SubscriptionHub,
    /// Dates changed inside an open `exclusive` section, published on commit.
    deferred: RefCell<Option<BTreeSet<Date>>>,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self {
            conn,
            hub: SubscriptionHub::new(),
            deferred: RefCell::new(None),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_RECORDS_V1)
            .context("failed to apply mission record schema")?;

        let now = format_rfc3339(now_utc()).context("failed to format migration timestamp")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![RECORDS_MIGRATION_VERSION, now],
            )
            .context("failed to register mission record schema migration")?;

        tracing::debug!(version = RECORDS_MIGRATION_VERSION, "sqlite schema ready");
        Ok(())
    }

    pub fn record_count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM mission_records", [], |row| row.get(0))
            .map_err(map_sqlite_error)?;
        usize::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("invalid record count: {count}")))
    }

    pub fn live_subscribers(&self) -> usize {
        self.hub.live_subscribers()
    }

    fn changed(&self, date: Date) {
        if let Some(pending) = self.deferred.borrow_mut().as_mut() {
            pending.insert(date);
            return;
        }
        self.publish(date);
    }

    fn publish(&self, date: Date) {
        self.hub.notify(date, |range| self.query_range(range));
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, date: Date, department: &str) -> StoreResult<Option<DailyRecord>> {
        let sql = format!("{SELECT_RECORD_COLUMNS} WHERE record_key = ?1");
        self.conn
            .query_row(&sql, params![record_key(date, department)], parse_record_row)
            .optional()
            .map_err(map_sqlite_error)
    }

    fn put(&self, record: &DailyRecord) -> StoreResult<()> {
        if record.is_empty() {
            return self.delete(record.date, &record.department);
        }
        record
            .validate()
            .map_err(|err| StoreError::InvalidData(err.to_string()))?;

        let missions_json = serde_json::to_string(&record.missions)
            .map_err(|err| StoreError::InvalidData(format!("failed to encode missions: {err}")))?;
        let members_json = serde_json::to_string(&record.meditation_members)
            .map_err(|err| StoreError::InvalidData(format!("failed to encode members: {err}")))?;
        let updated_at = format_rfc3339(record.updated_at)
            .map_err(|err| StoreError::InvalidData(err.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO mission_records(record_key, date, department, missions_json, members_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(record_key) DO UPDATE SET
                   missions_json = excluded.missions_json,
                   members_json = excluded.members_json,
                   updated_at = excluded.updated_at",
                params![
                    record.key(),
                    format_date(record.date),
                    record.department,
                    missions_json,
                    members_json,
                    updated_at
                ],
            )
            .map_err(map_sqlite_error)?;

        tracing::debug!(key = %record.key(), "record replaced");
        self.changed(record.date);
        Ok(())
    }

    fn delete(&self, date: Date, department: &str) -> StoreResult<()> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM mission_records WHERE record_key = ?1",
                params![record_key(date, department)],
            )
            .map_err(map_sqlite_error)?;

        if removed > 0 {
            tracing::debug!(key = %record_key(date, department), "record removed");
            self.changed(date);
        }
        Ok(())
    }

    fn query_range(&self, range: DateRange) -> StoreResult<Vec<DailyRecord>> {
        let sql = format!(
            "{SELECT_RECORD_COLUMNS}
             WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
             ORDER BY date ASC, department ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(
                params![range.start.map(format_date), range.end.map(format_date)],
                parse_record_row,
            )
            .map_err(map_sqlite_error)?;
        collect_rows(rows)
    }

    fn subscribe(&self, range: DateRange) -> StoreResult<RecordSubscription> {
        let initial = self.query_range(range)?;
        tracing::debug!(range = %range, records = initial.len(), "subscription opened");
        Ok(self.hub.register(range, initial))
    }

    /// Runs `op` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// Subscribers are notified once, after a successful commit. A failed
    /// `op` rolls back every write it made. Nested calls join the open
    /// transaction.
    fn exclusive<T, E, F>(&self, op: F) -> Result<T, E>
    where
        Self: Sized,
        E: From<StoreError>,
        F: FnOnce(&Self) -> Result<T, E>,
    {
        if self.deferred.borrow().is_some() {
            return op(self);
        }

        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| E::from(map_sqlite_error(err)))?;
        *self.deferred.borrow_mut() = Some(BTreeSet::new());

        let result = op(self);
        let changed = self.deferred.borrow_mut().take().unwrap_or_default();

        match result {
            Ok(value) => {
                if let Err(err) = self.conn.execute_batch("COMMIT") {
                    if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                        tracing::warn!(error = %rollback, "rollback after failed commit failed");
                    }
                    return Err(E::from(map_sqlite_error(err)));
                }
                for date in changed {
                    self.publish(date);
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Maps SQLite failures onto the store error taxonomy.
pub fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    if matches!(err, rusqlite::Error::FromSqlConversionFailure(..)) {
        return StoreError::InvalidData(err.to_string());
    }

    match err.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::FileLockingProtocolFailed,
        ) => StoreError::Transport(err.to_string()),
        Some(
            ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied,
        ) => StoreError::Permission(err.to_string()),
        _ => StoreError::Other(Box::new(err)),
    }
}

fn conversion_error(index: usize, kind: rusqlite::types::Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyRecord> {
    let date_raw: String = row.get(0)?;
    let department: String = row.get(1)?;
    let missions_json: String = row.get(2)?;
    let members_json: String = row.get(3)?;
    let updated_at_raw: String = row.get(4)?;

    let date = parse_date(&date_raw)
        .map_err(|err| conversion_error(0, rusqlite::types::Type::Text, err.to_string()))?;

    let missions: BTreeMap<String, u32> = serde_json::from_str(&missions_json).map_err(|err| {
        conversion_error(
            2,
            rusqlite::types::Type::Text,
            format!("invalid missions_json: {err}"),
        )
    })?;

    let meditation_members: BTreeMap<String, BTreeSet<String>> =
        serde_json::from_str(&members_json).map_err(|err| {
            conversion_error(
                3,
                rusqlite::types::Type::Text,
                format!("invalid members_json: {err}"),
            )
        })?;

    let updated_at = parse_rfc3339_utc(&updated_at_raw)
        .map_err(|err| conversion_error(4, rusqlite::types::Type::Text, err.to_string()))?;

    Ok(DailyRecord {
        date,
        department,
        missions,
        meditation_members,
        updated_at,
    })
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> StoreResult<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row.map_err(map_sqlite_error)?);
    }
    Ok(values)
}
