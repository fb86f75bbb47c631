//! SQLite persistence: the attendance ledger and the identity store share one database.
//!
//! All access goes through a single `tokio_rusqlite` connection, so writes
//! are serialized; the `UNIQUE(label, day)` constraint makes `record` an
//! atomic check-and-insert regardless.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use rollcall_core::{
    AttendanceEvent, EventId, Identity, Ledger, LedgerError, NewAttendance, RecordError,
};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    label       TEXT NOT NULL UNIQUE,
    affiliation TEXT NOT NULL DEFAULT '',
    category    TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS attendance_events (
    id          TEXT PRIMARY KEY,
    identity_id INTEGER NOT NULL,
    label       TEXT NOT NULL,
    affiliation TEXT NOT NULL,
    category    TEXT NOT NULL,
    image_url   TEXT,
    recorded_at TEXT NOT NULL,
    day         TEXT NOT NULL,
    UNIQUE (label, day)
);
CREATE INDEX IF NOT EXISTS idx_attendance_events_day ON attendance_events (day);
";

const EVENT_COLUMNS: &str =
    "id, identity_id, label, affiliation, category, image_url, recorded_at, day";

const DAY_FORMAT: &str = "%Y-%m-%d";

/// An identity as supplied for import. Accepts the `name`/`universitas`/
/// `kategori` field names of intern roster exports.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRecord {
    #[serde(alias = "name")]
    pub label: String,
    #[serde(default, alias = "universitas")]
    pub affiliation: String,
    #[serde(default, alias = "kategori")]
    pub category: String,
}

pub struct SqliteLedger {
    conn: Connection,
}

fn storage(e: tokio_rusqlite::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

fn parse_day(raw: &str, column: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DAY_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    let recorded_at: String = row.get(6)?;
    let day: String = row.get(7)?;
    Ok(AttendanceEvent {
        id: EventId(row.get(0)?),
        identity_id: row.get(1)?,
        label: row.get(2)?,
        affiliation: row.get(3)?,
        category: row.get(4)?,
        image_url: row.get(5)?,
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        day: parse_day(&day, 7)?,
    })
}

impl SqliteLedger {
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).await.map_err(storage)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().await.map_err(storage)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.call(|c| {
            c.busy_timeout(Duration::from_secs(5))?;
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(storage)?;
        Ok(Self { conn })
    }

    /// Every identity in the store, by label.
    pub async fn load_identities(&self) -> Result<Vec<Identity>, LedgerError> {
        self.conn
            .call(|c| {
                let mut stmt =
                    c.prepare("SELECT id, label, affiliation, category FROM identities ORDER BY label")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Identity {
                        id: row.get(0)?,
                        label: row.get(1)?,
                        affiliation: row.get(2)?,
                        category: row.get(3)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(storage)
    }

    /// Insert identities whose label is not yet present. Returns how many were added.
    pub async fn import_identities(&self, records: Vec<IdentityRecord>) -> Result<usize, LedgerError> {
        self.conn
            .call(move |c| {
                let tx = c.transaction()?;
                let mut added = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO identities (label, affiliation, category) VALUES (?1, ?2, ?3)
                         ON CONFLICT (label) DO NOTHING",
                    )?;
                    for r in &records {
                        let label = r.label.trim();
                        if label.is_empty() {
                            continue;
                        }
                        added += stmt.execute(params![label, r.affiliation.trim(), r.category.trim()])?;
                    }
                }
                tx.commit()?;
                Ok(added)
            })
            .await
            .map_err(storage)
    }

    async fn events_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, LedgerError> {
        let (from, to) = (day_key(from), day_key(to));
        self.conn
            .call(move |c| {
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM attendance_events
                     WHERE day >= ?1 AND day <= ?2 ORDER BY day, recorded_at"
                );
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt.query_map(params![from, to], event_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(storage)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn has_attended(&self, label: &str, day: NaiveDate) -> Result<bool, LedgerError> {
        let label = label.to_string();
        let day = day_key(day);
        self.conn
            .call(move |c| {
                Ok(c.query_row(
                    "SELECT EXISTS (SELECT 1 FROM attendance_events WHERE label = ?1 AND day = ?2)",
                    params![label, day],
                    |row| row.get::<_, bool>(0),
                )?)
            })
            .await
            .map_err(storage)
    }

    async fn record(&self, event: NewAttendance) -> Result<EventId, RecordError> {
        let id = EventId::generate();
        let day = event.day();
        let label = event.label.clone();
        let row_id = id.0.clone();

        let inserted = self
            .conn
            .call(move |c| {
                Ok(c.execute(
                    "INSERT INTO attendance_events
                        (id, identity_id, label, affiliation, category, image_url, recorded_at, day)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (label, day) DO NOTHING",
                    params![
                        row_id,
                        event.identity_id,
                        event.label,
                        event.affiliation,
                        event.category,
                        event.image_url,
                        event.recorded_at.to_rfc3339(),
                        day_key(day),
                    ],
                )?)
            })
            .await
            .map_err(storage)?;

        if inserted == 0 {
            return Err(RecordError::Duplicate { label, day });
        }
        Ok(id)
    }

    async fn list_for_day(&self, day: NaiveDate) -> Result<Vec<AttendanceEvent>, LedgerError> {
        self.events_between(day, day).await
    }

    async fn list_for_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, LedgerError> {
        self.events_between(from, to).await
    }

    async fn attendance_days(&self) -> Result<Vec<NaiveDate>, LedgerError> {
        self.conn
            .call(|c| {
                let mut stmt =
                    c.prepare("SELECT DISTINCT day FROM attendance_events ORDER BY day DESC")?;
                let rows = stmt.query_map([], |row| {
                    let raw: String = row.get(0)?;
                    parse_day(&raw, 0)
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(storage)
    }

    async fn first_day(&self) -> Result<Option<NaiveDate>, LedgerError> {
        self.conn
            .call(|c| {
                let raw: Option<String> = c
                    .query_row("SELECT MIN(day) FROM attendance_events", [], |row| row.get(0))
                    .optional()?
                    .flatten();
                Ok(raw.map(|d| parse_day(&d, 0)).transpose()?)
            })
            .await
            .map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn at(d: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, d, h, 0, 0)
            .unwrap()
    }

    fn attendance(label: &str, d: u32, h: u32) -> NewAttendance {
        let identity = Identity {
            id: 7,
            label: label.into(),
            affiliation: "ITB".into(),
            category: "Mobile".into(),
        };
        NewAttendance::for_identity(&identity, Some(format!("/images/{label}.jpg")), at(d, h))
    }

    #[tokio::test]
    async fn test_record_roundtrip_and_duplicate() {
        let ledger = SqliteLedger::open_in_memory().await.unwrap();
        let id = ledger.record(attendance("Alice", 10, 8)).await.unwrap();

        let day = at(10, 0).date_naive();
        assert!(ledger.has_attended("Alice", day).await.unwrap());
        assert!(!ledger.has_attended("Bob", day).await.unwrap());

        let events = ledger.list_for_day(day).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].recorded_at, at(10, 8));
        assert_eq!(events[0].image_url.as_deref(), Some("/images/Alice.jpg"));
        assert_eq!(events[0].jobdesk(), "Mobile - ITB");

        let err = ledger.record(attendance("Alice", 10, 15)).await.unwrap_err();
        assert!(matches!(err, RecordError::Duplicate { ref label, .. } if label == "Alice"));
        assert_eq!(ledger.list_for_day(day).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_day_queries() {
        let ledger = SqliteLedger::open_in_memory().await.unwrap();
        assert_eq!(ledger.first_day().await.unwrap(), None);
        assert!(ledger.attendance_days().await.unwrap().is_empty());

        ledger.record(attendance("Alice", 3, 9)).await.unwrap();
        ledger.record(attendance("Bob", 3, 8)).await.unwrap();
        ledger.record(attendance("Alice", 5, 9)).await.unwrap();
        ledger.record(attendance("Alice", 30, 9)).await.unwrap();

        let d = |n| at(n, 0).date_naive();
        assert_eq!(ledger.first_day().await.unwrap(), Some(d(3)));
        assert_eq!(ledger.attendance_days().await.unwrap(), vec![d(30), d(5), d(3)]);

        let day3: Vec<String> = ledger
            .list_for_day(d(3))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.label)
            .collect();
        assert_eq!(day3, vec!["Bob", "Alice"]);
        assert_eq!(ledger.list_for_date_range(d(4), d(29)).await.unwrap().len(), 1);

        let month = ledger.aggregate_by_month(2025, 6).await.unwrap();
        assert_eq!(month.total_attendance, 4);
        assert_eq!(month.unique_days, 3);
        assert!(ledger.aggregate_by_month(2025, 13).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_record_single_row() {
        let ledger = std::sync::Arc::new(SqliteLedger::open_in_memory().await.unwrap());
        let mut handles = Vec::new();
        for h in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.record(attendance("Alice", 10, 8 + h % 3)).await.is_ok()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_import_identities_inserts_new_only() {
        let store = SqliteLedger::open_in_memory().await.unwrap();
        let records: Vec<IdentityRecord> = serde_json::from_str(
            r#"[
                {"name": "Alice", "universitas": "UI", "kategori": "Backend"},
                {"label": "Bob", "affiliation": "ITS"},
                {"name": "  "}
            ]"#,
        )
        .unwrap();
        assert_eq!(store.import_identities(records.clone()).await.unwrap(), 2);
        assert_eq!(store.import_identities(records).await.unwrap(), 0);

        let identities = store.load_identities().await.unwrap();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].label, "Alice");
        assert_eq!(identities[0].affiliation, "UI");
        assert_eq!(identities[1].category, "");
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        {
            let ledger = SqliteLedger::open(&path).await.unwrap();
            ledger.record(attendance("Alice", 10, 8)).await.unwrap();
        }
        let ledger = SqliteLedger::open(&path).await.unwrap();
        assert!(ledger.has_attended("Alice", at(10, 0).date_naive()).await.unwrap());
    }
}
