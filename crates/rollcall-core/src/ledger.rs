//! Daily attendance ledger: the source of truth for who attended when.
//!
//! `record` is the single serialization point for invariant "one event per
//! label per day": implementations must make the check-and-insert atomic
//! against concurrent callers, typically via a uniqueness constraint.

use crate::report::{month_bounds, MonthlyAggregate};
use crate::types::{AttendanceEvent, EventId, NewAttendance};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger storage failure: {0}")]
    Storage(String),
    #[error("invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{label} already has an attendance event on {day}")]
    Duplicate { label: String, day: NaiveDate },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn has_attended(&self, label: &str, day: NaiveDate) -> Result<bool, LedgerError>;

    /// Append an event. Fails with [`RecordError::Duplicate`] if the label
    /// already has an event on the event's day.
    async fn record(&self, event: NewAttendance) -> Result<EventId, RecordError>;

    /// Events of one day, oldest first.
    async fn list_for_day(&self, day: NaiveDate) -> Result<Vec<AttendanceEvent>, LedgerError>;

    /// Events with `from <= day <= to`, oldest first.
    async fn list_for_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, LedgerError>;

    /// Distinct days with at least one event, newest first.
    async fn attendance_days(&self) -> Result<Vec<NaiveDate>, LedgerError>;

    /// Earliest day in the ledger.
    async fn first_day(&self) -> Result<Option<NaiveDate>, LedgerError>;

    async fn aggregate_by_month(&self, year: i32, month: u32) -> Result<MonthlyAggregate, LedgerError> {
        let (from, to) = month_bounds(year, month).ok_or(LedgerError::InvalidMonth { year, month })?;
        let events = self.list_for_date_range(from, to).await?;
        Ok(MonthlyAggregate::from_events(year, month, &events))
    }
}

/// In-process ledger. Durable only for the life of the process; used by
/// tests and by embedders that bring their own persistence.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    events: Mutex<BTreeMap<(NaiveDate, String), AttendanceEvent>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(NaiveDate, String), AttendanceEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn collect_sorted<'a>(events: impl Iterator<Item = &'a AttendanceEvent>) -> Vec<AttendanceEvent> {
        let mut out: Vec<AttendanceEvent> = events.cloned().collect();
        out.sort_by_key(|e| e.recorded_at);
        out
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn has_attended(&self, label: &str, day: NaiveDate) -> Result<bool, LedgerError> {
        Ok(self.lock().contains_key(&(day, label.to_string())))
    }

    async fn record(&self, event: NewAttendance) -> Result<EventId, RecordError> {
        let key = (event.day(), event.label.clone());
        let mut events = self.lock();
        if events.contains_key(&key) {
            return Err(RecordError::Duplicate {
                label: key.1,
                day: key.0,
            });
        }
        let id = EventId::generate();
        events.insert(key, event.into_event(id.clone()));
        Ok(id)
    }

    async fn list_for_day(&self, day: NaiveDate) -> Result<Vec<AttendanceEvent>, LedgerError> {
        let events = self.lock();
        Ok(Self::collect_sorted(
            events.values().filter(|e| e.day == day),
        ))
    }

    async fn list_for_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, LedgerError> {
        let events = self.lock();
        Ok(Self::collect_sorted(
            events.values().filter(|e| e.day >= from && e.day <= to),
        ))
    }

    async fn attendance_days(&self) -> Result<Vec<NaiveDate>, LedgerError> {
        let mut days: Vec<NaiveDate> = self.lock().keys().map(|(day, _)| *day).collect();
        days.dedup();
        days.reverse();
        Ok(days)
    }

    async fn first_day(&self) -> Result<Option<NaiveDate>, LedgerError> {
        Ok(self.lock().keys().next().map(|(day, _)| *day))
    }
}
