//! This module handles conversion between iCal files and internal representations
//!
//! It is a wrapper around different Rust third-party libraries, since I haven't find any complete library that is able to parse _and_ generate iCal files.
//! External feeds are decoded once into [`ParsedFeed`], whose components are either a [`SingleOccurrence`] or a [`RecurringComponent`].

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

mod parser;
pub use parser::parse_feed;
mod builder;
pub use builder::{build_feed, recurrence_rule};

use crate::config::{ORG_NAME, PRODUCT_NAME};
use crate::timezone::DisplayZone;

/// Recurring components are never expanded past this many occurrences
pub const MAX_OCCURRENCES: u16 = 1000;

pub fn default_prod_id() -> String {
    let org = ORG_NAME.lock().map(|s| s.clone()).unwrap_or_default();
    let product = PRODUCT_NAME.lock().map(|s| s.clone()).unwrap_or_default();
    format!("-//{}//{}//EN", org, product)
}

/// The content of an external calendar feed
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedFeed {
    /// The `X-WR-CALNAME` of the feed, if any
    pub name: Option<String>,
    pub components: Vec<FeedComponent>,
}

/// A `VEVENT` of an external feed
#[derive(Clone, Debug, PartialEq)]
pub enum FeedComponent {
    Single(SingleOccurrence),
    Recurring(RecurringComponent),
}

impl FeedComponent {
    pub fn details(&self) -> &EventDetails {
        match self {
            FeedComponent::Single(s) => &s.details,
            FeedComponent::Recurring(r) => &r.details,
        }
    }
}

/// What every external event carries
#[derive(Clone, Debug, PartialEq)]
pub struct EventDetails {
    /// The `UID` of the component, or a key derived from its summary and start when it has none
    pub key: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    /// Whether the start was a `VALUE=DATE` (whole day) value
    pub all_day: bool,
}

impl EventDetails {
    pub fn duration(&self) -> Duration {
        match self.end {
            Some(end) if end > self.start => end - self.start,
            _ => Duration::zero(),
        }
    }
}

/// A component that happens exactly once
#[derive(Clone, Debug, PartialEq)]
pub struct SingleOccurrence {
    pub details: EventDetails,
}

/// A component carrying an `RRULE`
#[derive(Clone, Debug, PartialEq)]
pub struct RecurringComponent {
    pub details: EventDetails,
    /// The raw `RRULE` value, e.g. `FREQ=WEEKLY;BYDAY=MO`
    pub rule: String,
    /// The zone the start is expressed in (`None` for UTC starts)
    pub start_tz: Option<Tz>,
    /// Occurrences removed by `EXDATE` or replaced by an overriding component
    pub exdates: Vec<DateTime<Utc>>,
}

impl RecurringComponent {
    /// Every occurrence start whose span intersects `[window_start, window_end]`
    pub fn occurrences_between(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>, rrule::RRuleError> {
        let dtstart = match self.start_tz {
            None => format!("DTSTART:{}", self.details.start.format("%Y%m%dT%H%M%SZ")),
            Some(tz) => format!("DTSTART;TZID={}:{}", tz.name(), self.details.start.with_timezone(&tz).format("%Y%m%dT%H%M%S")),
        };
        let set: rrule::RRuleSet = format!("{}\nRRULE:{}", dtstart, self.utc_rule()).parse()?;

        let duration = self.details.duration();
        let utc = rrule::Tz::Tz(chrono_tz::UTC);
        let after = window_start - duration - Duration::seconds(1);
        let before = window_end + Duration::seconds(1);
        let result = set
            .after(after.with_timezone(&utc))
            .before(before.with_timezone(&utc))
            .all(MAX_OCCURRENCES);
        if result.limited {
            log::warn!("Component {} has more than {} occurrences in the window, ignoring the next ones", self.details.key, MAX_OCCURRENCES);
        }

        let occurrences = result.dates.into_iter()
            .map(|occurrence| occurrence.with_timezone(&Utc))
            .filter(|occurrence| self.exdates.contains(occurrence) == false)
            .filter(|occurrence| *occurrence + duration >= window_start && *occurrence <= window_end)
            .collect();
        Ok(occurrences)
    }

    /// The rule, with its `UNTIL` turned into a UTC date-time.
    ///
    /// Feeds often end all-day or local events with a bare date (or a local time), while the start is
    /// handed to the rrule parser with a TZID, which requires a UTC `UNTIL`. A bare date ends at the
    /// end of that day in the start zone.
    fn utc_rule(&self) -> String {
        let zone = DisplayZone::new(self.start_tz.unwrap_or(chrono_tz::UTC));
        self.rule.split(';')
            .map(|part| match part.split_once('=') {
                Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => match utc_until(value, &zone) {
                    Some(until) => format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")),
                    None => part.to_string(),
                },
                _ => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// `None` when the value already is a UTC date-time, or cannot be read
fn utc_until(value: &str, zone: &DisplayZone) -> Option<DateTime<Utc>> {
    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return zone.end_of_day(date);
    }
    if value.ends_with('Z') {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    zone.resolve_local(naive)
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekly_standup(exdates: Vec<DateTime<Utc>>) -> RecurringComponent {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        RecurringComponent {
            details: EventDetails {
                key: "standup".to_string(),
                summary: "Standup".to_string(),
                description: None,
                location: None,
                start,
                end: Some(start + Duration::minutes(30)),
                all_day: false,
            },
            rule: "FREQ=WEEKLY".to_string(),
            start_tz: None,
            exdates,
        }
    }

    #[test]
    fn occurrences_in_window() {
        let component = weekly_standup(Vec::new());
        let got = component.occurrences_between(
            Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 22, 9, 0, 0).unwrap(),
        ).unwrap();
        assert_eq!(got, vec![
            Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 22, 9, 0, 0).unwrap(),
        ]);
    }

    #[test]
    fn occurrences_overlapping_the_window_start_are_kept() {
        let component = weekly_standup(Vec::new());
        let got = component.occurrences_between(
            Utc.with_ymd_and_hms(2024, 1, 8, 9, 15, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        ).unwrap();
        assert_eq!(got, vec![Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()]);
    }

    #[test]
    fn exdates_are_skipped() {
        let component = weekly_standup(vec![Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()]);
        let got = component.occurrences_between(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap(),
        ).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.contains(&Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()) == false);
    }

    #[test]
    fn bare_until_dates_end_with_their_day() {
        // An all-day event, read in the Shanghai display zone
        let mut component = weekly_standup(Vec::new());
        component.details.start = Utc.with_ymd_and_hms(2023, 12, 31, 16, 0, 0).unwrap();
        component.details.end = None;
        component.details.all_day = true;
        component.start_tz = Some(chrono_tz::Asia::Shanghai);
        component.rule = "FREQ=WEEKLY;UNTIL=20240129".to_string();
        assert_eq!(component.utc_rule(), "FREQ=WEEKLY;UNTIL=20240129T155959Z");

        let got = component.occurrences_between(
            Utc.with_ymd_and_hms(2023, 12, 31, 16, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ).unwrap();
        // Jan 29th is the last one
        assert_eq!(got.len(), 5);
        assert_eq!(got.last(), Some(&Utc.with_ymd_and_hms(2024, 1, 28, 16, 0, 0).unwrap()));
    }

    #[test]
    fn local_and_utc_until_values() {
        let mut component = weekly_standup(Vec::new());
        component.start_tz = Some(chrono_tz::Europe::Paris);
        component.rule = "FREQ=WEEKLY;UNTIL=20240115T100000;BYDAY=MO".to_string();
        assert_eq!(component.utc_rule(), "FREQ=WEEKLY;UNTIL=20240115T090000Z;BYDAY=MO");

        component.rule = "FREQ=WEEKLY;UNTIL=20240115T100000Z".to_string();
        assert_eq!(component.utc_rule(), "FREQ=WEEKLY;UNTIL=20240115T100000Z");
    }

    #[test]
    fn invalid_rules_are_reported() {
        let mut component = weekly_standup(Vec::new());
        component.rule = "FREQ=SOMETIMES".to_string();
        assert!(component.occurrences_between(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        ).is_err());
    }
}
