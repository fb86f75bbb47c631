//! Local civil time.
//!
//! Days are computed in the deployment's time zone, not the host's, so the
//! attendance window turns over at local midnight wherever the daemon runs.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown time zone {0:?}: expected an IANA name such as Asia/Jakarta or an offset such as +07:00")]
pub struct ZoneParseError(pub String);

/// The zone attendance days are counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// IANA zone; the offset follows daylight-saving rules.
    Named(Tz),
    Fixed(FixedOffset),
}

impl Zone {
    /// `utc` as local time, carrying the offset in effect at that instant.
    pub fn localize(&self, utc: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Zone::Named(tz) => utc.with_timezone(tz).fixed_offset(),
            Zone::Fixed(offset) => utc.with_timezone(offset),
        }
    }

    /// First instant of `day`. Usually midnight; later when a DST jump skips it.
    pub fn start_of_day(&self, day: NaiveDate) -> Option<DateTime<FixedOffset>> {
        match self {
            Zone::Named(tz) => (0..24).find_map(|hour| {
                let local = day.and_hms_opt(hour, 0, 0)?;
                tz.from_local_datetime(&local).earliest().map(|t| t.fixed_offset())
            }),
            Zone::Fixed(offset) => day.and_hms_opt(0, 0, 0)?.and_local_timezone(*offset).single(),
        }
    }
}

impl FromStr for Zone {
    type Err = ZoneParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(tz) = s.parse::<Tz>() {
            return Ok(Zone::Named(tz));
        }
        s.parse::<FixedOffset>()
            .map(Zone::Fixed)
            .map_err(|_| ZoneParseError(s.to_string()))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Named(tz) => f.write_str(tz.name()),
            Zone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn zone(&self) -> Zone;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Time remaining until the next local midnight.
    fn until_next_midnight(&self) -> Duration {
        let now = self.now();
        let tomorrow = now.date_naive().succ_opt().unwrap_or(NaiveDate::MAX);
        match self.zone().start_of_day(tomorrow) {
            Some(midnight) => midnight.signed_duration_since(now),
            None => Duration::days(1),
        }
    }
}

/// Wall clock in the deployment's zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    zone: Zone,
}

impl SystemClock {
    pub fn new(zone: Zone) -> Self {
        Self { zone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.zone.localize(Utc::now())
    }

    fn zone(&self) -> Zone {
        self.zone
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    zone: Zone,
}

impl ManualClock {
    /// Clock fixed at `now`, counting days in `now`'s offset.
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self::in_zone(Zone::Fixed(*now.offset()), now.with_timezone(&Utc))
    }

    pub fn in_zone(zone: Zone, now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            zone,
        }
    }

    pub fn set<T: TimeZone>(&self, now: DateTime<T>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now.with_timezone(&Utc);
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.zone.localize(*self.now.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn zone(&self) -> Zone {
        self.zone
    }
}
