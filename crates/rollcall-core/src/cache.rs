//! "Already attended today" cache.
//!
//! A derived view over the ledger: it is only ever filled from ledger reads
//! or after a ledger write has committed, so it never names a label the
//! ledger does not have. A miss is not authoritative; the ledger's `record`
//! decides races.

use crate::ledger::{Ledger, LedgerError};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

#[derive(Debug)]
struct DayView {
    day: NaiveDate,
    labels: Arc<HashSet<String>>,
    /// Marks for days after `day`, committed before the cache rolled over.
    ahead: HashSet<(NaiveDate, String)>,
}

impl DayView {
    fn new(day: NaiveDate, labels: HashSet<String>) -> Self {
        Self {
            day,
            labels: Arc::new(labels),
            ahead: HashSet::new(),
        }
    }
}

#[derive(Debug)]
pub struct AttendanceCache {
    view: RwLock<DayView>,
}

impl AttendanceCache {
    /// An empty cache for `day`. Use [`AttendanceCache::load`] to warm it.
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            view: RwLock::new(DayView::new(day, HashSet::new())),
        }
    }

    /// Build the cache for `day` from the ledger.
    pub async fn load(ledger: &dyn Ledger, day: NaiveDate) -> Result<Self, LedgerError> {
        let labels = Self::labels_for(ledger, day).await?;
        tracing::info!(%day, marked = labels.len(), "attendance cache loaded");
        Ok(Self {
            view: RwLock::new(DayView::new(day, labels)),
        })
    }

    /// Day the cache currently describes.
    pub fn day(&self) -> NaiveDate {
        self.read().day
    }

    pub fn len(&self) -> usize {
        self.read().labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `label` is known to have attended on `day`.
    ///
    /// Always false for a day other than the cache's current day.
    pub fn is_marked(&self, label: &str, day: NaiveDate) -> bool {
        let view = self.read();
        view.day == day && view.labels.contains(label)
    }

    /// Record that `label` attended on `day`. Idempotent.
    ///
    /// A mark for an earlier day is ignored: a write that commits just after
    /// rollover must not leak into the new day. A mark for a later day is
    /// held until the cache rolls over to that day.
    pub fn mark(&self, label: &str, day: NaiveDate) {
        let mut view = self.write();
        if day < view.day {
            tracing::debug!(label, %day, cache_day = %view.day, "mark for stale day ignored");
            return;
        }
        if day > view.day {
            view.ahead.insert((day, label.to_string()));
            return;
        }
        if !view.labels.contains(label) {
            Arc::make_mut(&mut view.labels).insert(label.to_string());
        }
    }

    /// Make sure the cache describes `today`, rebuilding it from the ledger
    /// if the day has turned over. Returns whether a rebuild happened.
    ///
    /// The new set is built without holding the lock and swapped in whole,
    /// so readers see either the old day or the new one.
    pub async fn ensure_day(&self, ledger: &dyn Ledger, today: NaiveDate) -> Result<bool, LedgerError> {
        if self.read().day >= today {
            return Ok(false);
        }
        let mut fresh = Self::labels_for(ledger, today).await?;

        let mut view = self.write();
        if view.day >= today {
            // Another task rolled over first.
            return Ok(false);
        }
        let previous = view.day;
        // Marks for `today` that committed after the ledger read are held in
        // `ahead`; merge them so the new set misses nothing.
        let mut ahead = std::mem::take(&mut view.ahead);
        ahead.retain(|(day, label)| {
            if *day == today {
                fresh.insert(label.clone());
            }
            *day > today
        });
        *view = DayView {
            day: today,
            labels: Arc::new(fresh),
            ahead,
        };
        tracing::info!(from = %previous, to = %today, marked = view.labels.len(), "attendance cache rolled over");
        Ok(true)
    }

    /// Copy of the labels marked for the current day.
    pub fn snapshot(&self) -> (NaiveDate, Arc<HashSet<String>>) {
        let view = self.read();
        (view.day, Arc::clone(&view.labels))
    }

    async fn labels_for(ledger: &dyn Ledger, day: NaiveDate) -> Result<HashSet<String>, LedgerError> {
        Ok(ledger
            .list_for_day(day)
            .await?
            .into_iter()
            .map(|e| e.label)
            .collect())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DayView> {
        self.view.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DayView> {
        self.view.write().unwrap_or_else(|e| e.into_inner())
    }
}
