//! Conversions between stored UTC instants and the display timezone
//!
//! Everything is stored and compared in UTC. The display zone is only used to decide what "today", a weekday or a clock time mean to the user.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// The broken-down wall-clock representation of an instant in the display zone
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayComponents {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// 0 is Sunday, 6 is Saturday
    pub weekday: u32,
}

/// The single, fixed zone used for every user-facing date decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayZone {
    tz: Tz,
}

impl Default for DisplayZone {
    fn default() -> Self {
        Self::new(chrono_tz::Asia::Shanghai)
    }
}

impl DisplayZone {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn to_display_zone(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.tz)
    }

    pub fn to_utc(&self, local: DateTime<Tz>) -> DateTime<Utc> {
        local.with_timezone(&Utc)
    }

    pub fn now_in_display_zone(&self) -> DateTime<Tz> {
        self.to_display_zone(Utc::now())
    }

    pub fn display_components(&self, instant: DateTime<Utc>) -> DisplayComponents {
        let local = self.to_display_zone(instant);
        DisplayComponents {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
            second: local.second(),
            weekday: local.weekday().num_days_from_sunday(),
        }
    }

    /// Build the UTC instant matching a wall-clock time of the display zone.
    ///
    /// Returns `None` when the components do not describe a valid date or time.
    /// A wall-clock time that happens twice (DST fold) resolves to its earliest instant,
    /// a wall-clock time that never happens (DST gap) is shifted forward by an hour.
    ///
    /// So the round trip through [`Self::display_components`] only gives back the original instant
    /// for whole seconds outside of a DST fold.
    pub fn from_display_components(&self, year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<DateTime<Utc>> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, minute, second)?;
        self.resolve_local(date.and_time(time))
    }

    /// Same as [`Self::from_display_components`], from an already built local date-time
    pub fn resolve_local(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            LocalResult::None => {
                match self.tz.from_local_datetime(&(naive + Duration::hours(1))) {
                    LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
                    LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                    LocalResult::None => None,
                }
            },
        }
    }

    /// The calendar day an instant falls on, in the display zone
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.to_display_zone(instant).date_naive()
    }

    /// The wall-clock time of an instant, in the display zone
    pub fn time_of(&self, instant: DateTime<Utc>) -> NaiveTime {
        self.to_display_zone(instant).time()
    }

    /// The `YYYY-MM-DD` key identifying the calendar day of an instant
    pub fn instance_date(&self, instant: DateTime<Utc>) -> String {
        format_instance_date(self.date_of(instant))
    }

    /// The instant a display-zone day starts at
    pub fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.resolve_local(date.and_time(NaiveTime::MIN))
    }

    /// The last instant of a display-zone day
    pub fn end_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let next = date.succ_opt()?;
        Some(self.start_of_day(next)? - Duration::milliseconds(1))
    }
}

pub fn format_instance_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
