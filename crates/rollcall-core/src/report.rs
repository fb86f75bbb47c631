//! Read-only projections over ledger events for reporting consumers.

use crate::types::AttendanceEvent;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One attendee line inside a monthly aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendeeSummary {
    pub name: String,
    pub jobdesk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAttendance {
    pub date: NaiveDate,
    pub attendees: Vec<AttendeeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAggregate {
    pub year: i32,
    pub month: u32,
    pub total_attendance: usize,
    pub unique_days: usize,
    /// Mean attendees per day with any attendance, rounded to two decimals.
    pub avg_daily_attendance: f64,
    pub daily_stats: Vec<DailyAttendance>,
}

impl MonthlyAggregate {
    /// Aggregate the events that fall in `year`-`month`; others are ignored.
    pub fn from_events(year: i32, month: u32, events: &[AttendanceEvent]) -> Self {
        let mut by_day: BTreeMap<NaiveDate, Vec<&AttendanceEvent>> = BTreeMap::new();
        for event in events
            .iter()
            .filter(|e| e.day.year() == year && e.day.month() == month)
        {
            by_day.entry(event.day).or_default().push(event);
        }

        let total_attendance: usize = by_day.values().map(Vec::len).sum();
        let unique_days = by_day.len();
        let avg_daily_attendance = if unique_days > 0 {
            (total_attendance as f64 / unique_days as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };

        let daily_stats = by_day
            .into_iter()
            .map(|(date, mut events)| {
                events.sort_by_key(|e| e.recorded_at);
                DailyAttendance {
                    date,
                    attendees: events
                        .into_iter()
                        .map(|e| AttendeeSummary {
                            name: e.label.clone(),
                            jobdesk: e.jobdesk(),
                        })
                        .collect(),
                }
            })
            .collect();

        Self {
            year,
            month,
            total_attendance,
            unique_days,
            avg_daily_attendance,
            daily_stats,
        }
    }
}

/// First and last day of a month, or `None` for an invalid month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub has_attendance: bool,
}

/// Every day from `start` to `end` inclusive, flagged by whether it appears in `attended`.
pub fn attendance_calendar(
    start: NaiveDate,
    end: NaiveDate,
    attended: &BTreeSet<NaiveDate>,
) -> Vec<CalendarDay> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| CalendarDay {
            date,
            has_attendance: attended.contains(&date),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventId;
    use chrono::{FixedOffset, TimeZone};

    fn event(label: &str, y: i32, m: u32, d: u32, hour: u32) -> AttendanceEvent {
        let at = FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, hour, 0, 0)
            .unwrap();
        AttendanceEvent {
            id: EventId::generate(),
            identity_id: 1,
            label: label.into(),
            affiliation: "UGM".into(),
            category: "Data".into(),
            image_url: None,
            recorded_at: at,
            day: at.date_naive(),
        }
    }

    #[test]
    fn test_monthly_aggregate() {
        let events = vec![
            event("Bob", 2025, 5, 2, 9),
            event("Alice", 2025, 5, 2, 8),
            event("Alice", 2025, 5, 3, 8),
            event("Alice", 2025, 6, 1, 8),
        ];
        let agg = MonthlyAggregate::from_events(2025, 5, &events);
        assert_eq!(agg.total_attendance, 3);
        assert_eq!(agg.unique_days, 2);
        assert_eq!(agg.avg_daily_attendance, 1.5);
        assert_eq!(agg.daily_stats.len(), 2);
        // ordered by time within a day
        assert_eq!(agg.daily_stats[0].attendees[0].name, "Alice");
        assert_eq!(agg.daily_stats[0].attendees[1].name, "Bob");
        assert_eq!(agg.daily_stats[0].attendees[0].jobdesk, "Data - UGM");
    }

    #[test]
    fn test_monthly_aggregate_rounding_and_empty() {
        let events = vec![
            event("A", 2025, 5, 1, 8),
            event("B", 2025, 5, 1, 8),
            event("A", 2025, 5, 2, 8),
            event("A", 2025, 5, 3, 8),
        ];
        let agg = MonthlyAggregate::from_events(2025, 5, &events);
        assert_eq!(agg.avg_daily_attendance, 1.33);

        let empty = MonthlyAggregate::from_events(2025, 7, &events);
        assert_eq!(empty.total_attendance, 0);
        assert_eq!(empty.avg_daily_attendance, 0.0);
    }

    #[test]
    fn test_month_bounds() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(month_bounds(2024, 2), Some((d(2024, 2, 1), d(2024, 2, 29))));
        assert_eq!(month_bounds(2025, 12), Some((d(2025, 12, 1), d(2025, 12, 31))));
        assert_eq!(month_bounds(2025, 13), None);
        assert_eq!(month_bounds(2025, 0), None);
    }

    #[test]
    fn test_attendance_calendar() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 4, day).unwrap();
        let attended: BTreeSet<_> = [d(1), d(3)].into_iter().collect();
        let cal = attendance_calendar(d(1), d(4), &attended);
        assert_eq!(cal.len(), 4);
        assert!(cal[0].has_attendance);
        assert!(!cal[1].has_attendance);
        assert!(cal[2].has_attendance);
        assert!(!cal[3].has_attendance);

        assert!(attendance_calendar(d(4), d(1), &attended).is_empty());
    }
}
