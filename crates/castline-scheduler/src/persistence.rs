//! SQLite-backed persistence for destinations and the dispatch outcome log.
//! Survives restarts; availability transitions are single conditional UPDATEs.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use castline_core::error::{CastlineError, Result};
use castline_core::traits::{DestinationStore, OutcomeLog};
use castline_core::types::{
    Availability, AvailabilityKind, Destination, DispatchOutcome, ErrorClass, OutcomeStatus,
    SuppressionReason,
};
use chrono::{DateTime, SecondsFormat, Utc};

const DESTINATION_COLUMNS: &str = "id, name, alias, account_id, status, reason, suppressed_until, \
     send_count, last_sent_at, version, created_at, updated_at";

/// SQLite-backed destination store and outcome log.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| CastlineError::store(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| CastlineError::store(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| CastlineError::store("connection lock poisoned"))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            -- Destination pool with availability state
            CREATE TABLE IF NOT EXISTS destinations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                alias TEXT,
                account_id TEXT,
                status TEXT NOT NULL DEFAULT 'active',  -- active, suppressed_temporary, suppressed_permanent
                reason TEXT,                            -- rate_limited, slow_mode, write_forbidden, ...
                suppressed_until TEXT,                  -- only for suppressed_temporary
                send_count INTEGER NOT NULL DEFAULT 0,
                last_sent_at TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_destinations_status ON destinations(status);

            -- Append-only dispatch outcomes
            CREATE TABLE IF NOT EXISTS dispatch_outcomes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                cycle_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                destination_id TEXT NOT NULL,
                status TEXT NOT NULL,
                error_class TEXT,
                error_detail TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outcomes_status_ts ON dispatch_outcomes(status, timestamp);
         ",
            )
            .map_err(|e| CastlineError::store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn query_destinations(
        &self,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Destination>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {DESTINATION_COLUMNS} FROM destinations {filter} ORDER BY seq");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CastlineError::store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params, row_to_destination)
            .map_err(|e| CastlineError::store(format!("Query destinations: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(Some(d)) => out.push(d),
                Ok(None) => tracing::warn!("⚠️ Skipping destination row with inconsistent availability"),
                Err(e) => return Err(CastlineError::store(format!("Read destination: {e}"))),
            }
        }
        Ok(out)
    }
}

/// Map one row onto a [`Destination`]. `None` when the stored state breaks
/// the expiry invariant (e.g. a temporary suppression without expiry).
fn row_to_destination(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Destination>> {
    let status: String = row.get(4)?;
    let reason: Option<String> = row.get(5)?;
    let until: Option<String> = row.get(6)?;

    let Some(kind) = AvailabilityKind::parse(&status) else {
        return Ok(None);
    };
    let reason = reason.as_deref().and_then(SuppressionReason::parse);
    let Some(availability) = Availability::from_parts(kind, reason, until.as_deref().and_then(parse_ts))
    else {
        return Ok(None);
    };

    let last_sent: Option<String> = row.get(8)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Some(Destination {
        id: row.get(0)?,
        name: row.get(1)?,
        alias: row.get(2)?,
        account_id: row.get(3)?,
        availability,
        send_count: row.get::<_, i64>(7)? as u64,
        last_sent_at: last_sent.as_deref().and_then(parse_ts),
        version: row.get::<_, i64>(9)? as u64,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
    }))
}

/// Fixed-width UTC timestamps so text comparison in SQL matches time order.
fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

impl DestinationStore for SqliteStore {
    fn insert(&self, destination: Destination) -> Result<()> {
        let availability = &destination.availability;
        self.conn()?
            .execute(
                "INSERT INTO destinations
                 (id, name, alias, account_id, status, reason, suppressed_until,
                  send_count, last_sent_at, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                  name = excluded.name, alias = excluded.alias, account_id = excluded.account_id,
                  status = excluded.status, reason = excluded.reason,
                  suppressed_until = excluded.suppressed_until, send_count = excluded.send_count,
                  last_sent_at = excluded.last_sent_at, version = excluded.version,
                  updated_at = excluded.updated_at",
                rusqlite::params![
                    destination.id,
                    destination.name,
                    destination.alias,
                    destination.account_id,
                    availability.kind().as_str(),
                    availability.reason().map(|r| r.as_str()),
                    availability.suppressed_until().map(fmt_ts),
                    destination.send_count as i64,
                    destination.last_sent_at.map(fmt_ts),
                    destination.version as i64,
                    fmt_ts(destination.created_at),
                    fmt_ts(destination.updated_at),
                ],
            )
            .map_err(|e| CastlineError::store(format!("Insert destination: {e}")))?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute("DELETE FROM destinations WHERE id = ?1", [id])
            .map_err(|e| CastlineError::store(format!("Delete destination: {e}")))?;
        Ok(changed > 0)
    }

    fn load(&self, id: &str) -> Result<Option<Destination>> {
        Ok(self
            .query_destinations("WHERE id = ?1", &[&id])?
            .into_iter()
            .next())
    }

    fn list_all(&self) -> Result<Vec<Destination>> {
        self.query_destinations("", &[])
    }

    fn list_by_availability(&self, kind: AvailabilityKind) -> Result<Vec<Destination>> {
        self.query_destinations("WHERE status = ?1", &[&kind.as_str()])
    }

    fn compare_and_swap_availability(
        &self,
        id: &str,
        expected: AvailabilityKind,
        new: Availability,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE destinations
                 SET status = ?1, reason = ?2, suppressed_until = ?3,
                     version = version + 1, updated_at = ?4
                 WHERE id = ?5 AND status = ?6",
                rusqlite::params![
                    new.kind().as_str(),
                    new.reason().map(|r| r.as_str()),
                    new.suppressed_until().map(fmt_ts),
                    fmt_ts(Utc::now()),
                    id,
                    expected.as_str(),
                ],
            )
            .map_err(|e| CastlineError::store(format!("Swap availability: {e}")))?;
        if changed > 0 {
            return Ok(true);
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM destinations WHERE id = ?1)",
                [id],
                |row| row.get(0),
            )
            .map_err(|e| CastlineError::store(format!("Lookup destination: {e}")))?;
        if exists {
            Ok(false)
        } else {
            Err(CastlineError::DestinationNotFound(id.to_string()))
        }
    }

    fn record_delivery(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE destinations
                 SET send_count = send_count + 1, last_sent_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                rusqlite::params![fmt_ts(at), id],
            )
            .map_err(|e| CastlineError::store(format!("Record delivery: {e}")))?;
        if changed == 0 {
            return Err(CastlineError::DestinationNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl OutcomeLog for SqliteStore {
    fn append(&self, outcome: &DispatchOutcome) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO dispatch_outcomes
                 (id, cycle_id, session_id, destination_id, status, error_class, error_detail,
                  attempts, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    outcome.id,
                    outcome.cycle_id,
                    outcome.session_id,
                    outcome.destination_id,
                    outcome.status.as_str(),
                    outcome.error_class.map(|c| c.as_str()),
                    outcome.error_detail,
                    outcome.attempts,
                    fmt_ts(outcome.timestamp),
                ],
            )
            .map_err(|e| CastlineError::store(format!("Append outcome: {e}")))?;
        Ok(())
    }

    fn recent(&self, limit: usize, offset: usize) -> Result<Vec<DispatchOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, cycle_id, session_id, destination_id, status, error_class,
                        error_detail, attempts, timestamp
                 FROM dispatch_outcomes ORDER BY seq DESC LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| CastlineError::store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([limit as i64, offset as i64], |row| {
                let status: String = row.get(4)?;
                let error_class: Option<String> = row.get(5)?;
                let timestamp: String = row.get(8)?;
                Ok(DispatchOutcome {
                    id: row.get(0)?,
                    cycle_id: row.get(1)?,
                    session_id: row.get(2)?,
                    destination_id: row.get(3)?,
                    status: OutcomeStatus::parse(&status).unwrap_or(OutcomeStatus::FailedTerminal),
                    error_class: error_class.as_deref().and_then(ErrorClass::parse),
                    error_detail: row.get(6)?,
                    attempts: row.get(7)?,
                    timestamp: parse_ts(&timestamp).unwrap_or_else(Utc::now),
                })
            })
            .map_err(|e| CastlineError::store(format!("Query outcomes: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CastlineError::store(format!("Read outcome: {e}")))
    }

    fn count_since(&self, status: OutcomeStatus, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM dispatch_outcomes WHERE status = ?1 AND timestamp >= ?2",
                rusqlite::params![status.as_str(), fmt_ts(since)],
                |row| row.get(0),
            )
            .map_err(|e| CastlineError::store(format!("Count outcomes: {e}")))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("castline-db-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.list_all().unwrap().is_empty());
        drop(store);
        // Reopen runs the migration again without error.
        assert!(SqliteStore::open(&path).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_and_load_destination() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dest = Destination::new("-1001", "Rust Jobs")
            .with_alias("rustjobs")
            .with_account("acct-1");
        store.insert(dest).unwrap();

        let loaded = store.load("-1001").unwrap().unwrap();
        assert_eq!(loaded.name, "Rust Jobs");
        assert_eq!(loaded.alias.as_deref(), Some("rustjobs"));
        assert_eq!(loaded.account_id.as_deref(), Some("acct-1"));
        assert_eq!(loaded.availability, Availability::Active);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_cas_persists_suppression() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(Destination::new("a", "A")).unwrap();
        store.insert(Destination::new("b", "B")).unwrap();

        let until = Utc::now() + Duration::seconds(30);
        let temp = Availability::SuppressedTemporary {
            reason: SuppressionReason::RateLimited,
            until,
        };
        assert!(store
            .compare_and_swap_availability("a", AvailabilityKind::Active, temp)
            .unwrap());
        // Wrong expected state: nothing written.
        assert!(!store
            .compare_and_swap_availability(
                "a",
                AvailabilityKind::Active,
                Availability::SuppressedPermanent {
                    reason: SuppressionReason::UserBanned
                }
            )
            .unwrap());

        let a = store.load("a").unwrap().unwrap();
        assert_eq!(a.availability.kind(), AvailabilityKind::SuppressedTemporary);
        assert_eq!(a.availability.reason(), Some(SuppressionReason::RateLimited));
        assert!(a.availability.suppressed_until().is_some());
        assert_eq!(a.version, 1);

        let temps = store
            .list_by_availability(AvailabilityKind::SuppressedTemporary)
            .unwrap();
        assert_eq!(temps.len(), 1);
        assert_eq!(store.list_by_availability(AvailabilityKind::Active).unwrap().len(), 1);

        assert!(matches!(
            store.compare_and_swap_availability("zz", AvailabilityKind::Active, Availability::Active),
            Err(CastlineError::DestinationNotFound(_))
        ));
    }

    #[test]
    fn test_record_delivery_and_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(Destination::new("a", "A")).unwrap();
        store.record_delivery("a", Utc::now()).unwrap();
        assert_eq!(store.load("a").unwrap().unwrap().send_count, 1);
        assert!(store.record_delivery("zz", Utc::now()).is_err());
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
    }

    #[test]
    fn test_outcome_log() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .append(&DispatchOutcome::new("c1", "s1", "a", OutcomeStatus::Sent, now))
            .unwrap();
        store
            .append(
                &DispatchOutcome::new("c1", "s1", "b", OutcomeStatus::FailedTerminal, now)
                    .with_error(ErrorClass::Permanent, "write forbidden")
                    .with_attempts(1),
            )
            .unwrap();

        let recent = store.recent(10, 0).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].destination_id, "b");
        assert_eq!(recent[0].error_class, Some(ErrorClass::Permanent));
        assert_eq!(recent[0].attempts, 1);
        assert_eq!(store.recent(10, 1).unwrap()[0].destination_id, "a");

        let since = now - Duration::hours(24);
        assert_eq!(store.count_since(OutcomeStatus::Sent, since).unwrap(), 1);
        assert_eq!(store.count_since(OutcomeStatus::FailedTerminal, since).unwrap(), 1);
    }
}
