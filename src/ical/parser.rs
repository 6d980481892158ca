//! A module to parse external iCal feeds

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;

use crate::client::FeedError;
use crate::ical::{EventDetails, FeedComponent, ParsedFeed, RecurringComponent, SingleOccurrence};
use crate::timezone::DisplayZone;


/// Parse the body of an iCal feed.
///
/// Floating and all-day values are interpreted in `zone`.
/// Components that cannot be understood (e.g. without a valid `DTSTART`) are skipped with a warning; only a body that is not an iCal document at all is an error.
pub fn parse_feed(content: &str, zone: &DisplayZone) -> Result<ParsedFeed, FeedError> {
    if content.contains("BEGIN:VCALENDAR") == false {
        return Err(FeedError::Unparsable("no VCALENDAR found in the document".to_string()));
    }

    let reader = ical::IcalParser::new(content.as_bytes());
    let mut feed = ParsedFeed::default();
    let mut n_calendars = 0;
    let mut overrides = Vec::new();

    for calendar in reader {
        let calendar = calendar.map_err(|err| FeedError::Unparsable(err.to_string()))?;
        n_calendars += 1;

        if feed.name.is_none() {
            feed.name = property_value(&calendar.properties, "X-WR-CALNAME").map(String::from);
        }

        for event in &calendar.events {
            match parse_event(event, zone) {
                Err(err) => {
                    log::warn!("Ignoring an event of the feed: {}", err);
                },
                Ok(Parsed::Component(component)) => feed.components.push(component),
                Ok(Parsed::Override{ uid, recurrence_id, details }) => overrides.push((uid, recurrence_id, details)),
            }
        }
    }

    if n_calendars == 0 {
        return Err(FeedError::Unparsable("no VCALENDAR found in the document".to_string()));
    }

    apply_overrides(&mut feed, overrides);
    Ok(feed)
}

enum Parsed {
    Component(FeedComponent),
    /// A component that replaces one occurrence of a recurring component (it has a `RECURRENCE-ID`)
    Override { uid: String, recurrence_id: DateTime<Utc>, details: EventDetails },
}

fn parse_event(event: &IcalEvent, zone: &DisplayZone) -> Result<Parsed, String> {
    let props = &event.properties;

    let dtstart = find_property(props, "DTSTART").ok_or("missing DTSTART")?;
    let start = parse_date_time(dtstart, zone)?;
    let end = match find_property(props, "DTEND") {
        None => None,
        Some(prop) => Some(parse_date_time(prop, zone)?.instant),
    };

    let summary = property_value(props, "SUMMARY").map(unescape).unwrap_or_default();
    let uid = property_value(props, "UID").map(String::from);
    let key = match &uid {
        Some(uid) => uid.clone(),
        None => format!("{}-{}", summary, start.instant.timestamp()),
    };

    let details = EventDetails {
        key,
        summary,
        description: property_value(props, "DESCRIPTION").map(unescape),
        location: property_value(props, "LOCATION").map(unescape),
        start: start.instant,
        end,
        all_day: start.all_day,
    };

    if let (Some(uid), Some(prop)) = (&uid, find_property(props, "RECURRENCE-ID")) {
        let recurrence_id = parse_date_time(prop, zone)?.instant;
        return Ok(Parsed::Override{ uid: uid.clone(), recurrence_id, details });
    }

    let rule = match property_value(props, "RRULE") {
        None => return Ok(Parsed::Component(FeedComponent::Single(SingleOccurrence{ details }))),
        Some(rule) => rule.to_string(),
    };

    let mut exdates = Vec::new();
    for prop in props.iter().filter(|p| p.name == "EXDATE") {
        match parse_date_time_list(prop, zone) {
            Ok(list) => exdates.extend(list),
            Err(err) => log::warn!("Ignoring an invalid EXDATE of {}: {}", details.key, err),
        }
    }

    Ok(Parsed::Component(FeedComponent::Recurring(RecurringComponent {
        details,
        rule,
        start_tz: start.tz,
        exdates,
    })))
}

/// Overriding components replace the occurrence they point to
fn apply_overrides(feed: &mut ParsedFeed, overrides: Vec<(String, DateTime<Utc>, EventDetails)>) {
    let mut masters: HashMap<String, usize> = HashMap::new();
    for (index, component) in feed.components.iter().enumerate() {
        if let FeedComponent::Recurring(r) = component {
            masters.insert(r.details.key.clone(), index);
        }
    }

    for (uid, recurrence_id, mut details) in overrides {
        if let Some(index) = masters.get(&uid) {
            if let Some(FeedComponent::Recurring(master)) = feed.components.get_mut(*index) {
                master.exdates.push(recurrence_id);
            }
        }
        details.key = format!("{}-{}", uid, recurrence_id.timestamp());
        feed.components.push(FeedComponent::Single(SingleOccurrence{ details }));
    }
}


/// A decoded `DTSTART`-like value
struct ParsedTime {
    instant: DateTime<Utc>,
    all_day: bool,
    /// The zone the value was expressed in, `None` for UTC values
    tz: Option<Tz>,
}

fn parse_date_time(prop: &Property, zone: &DisplayZone) -> Result<ParsedTime, String> {
    let value = prop.value.as_deref().ok_or_else(|| format!("empty {}", prop.name))?;
    parse_date_time_value(value.trim(), prop, zone)
}

fn parse_date_time_list(prop: &Property, zone: &DisplayZone) -> Result<Vec<DateTime<Utc>>, String> {
    let value = prop.value.as_deref().ok_or_else(|| format!("empty {}", prop.name))?;
    value.split(',')
        .map(|v| parse_date_time_value(v.trim(), prop, zone).map(|parsed| parsed.instant))
        .collect()
}

fn parse_date_time_value(value: &str, prop: &Property, zone: &DisplayZone) -> Result<ParsedTime, String> {
    let is_date = param_value(prop, "VALUE").map(|v| v.eq_ignore_ascii_case("DATE")).unwrap_or(false)
        || value.len() == 8;

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|err| format!("invalid date {:?} in {}: {}", value, prop.name, err))?;
        let instant = zone.start_of_day(date)
            .ok_or_else(|| format!("date {} does not exist in the display zone", date))?;
        return Ok(ParsedTime{ instant, all_day: true, tz: Some(zone.tz()) });
    }

    if let Some(stripped) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
            .map_err(|err| format!("invalid UTC date-time {:?} in {}: {}", value, prop.name, err))?;
        return Ok(ParsedTime{ instant: Utc.from_utc_datetime(&naive), all_day: false, tz: None });
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|err| format!("invalid date-time {:?} in {}: {}", value, prop.name, err))?;

    // Floating times are wall-clock times of the display zone
    let local_zone = match param_value(prop, "TZID") {
        None => *zone,
        Some(tzid) => match resolve_tzid(tzid) {
            Some(tz) => DisplayZone::new(tz),
            None => {
                log::warn!("Unknown TZID {:?}, using the display zone instead", tzid);
                *zone
            },
        },
    };
    let instant = local_zone.resolve_local(naive)
        .ok_or_else(|| format!("{} does not exist in {}", naive, local_zone.tz().name()))?;
    Ok(ParsedTime{ instant, all_day: false, tz: Some(local_zone.tz()) })
}

fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let trimmed = tzid.trim_matches('"');
    let normalized = trimmed
        .strip_prefix("/mozilla.org/20050126_1/")
        .or_else(|| trimmed.strip_prefix("/mozilla.org/"))
        .or_else(|| trimmed.strip_prefix("/softwarestudio.org/"))
        .unwrap_or(trimmed);
    Tz::from_str(normalized).ok()
}

fn find_property<'a>(props: &'a [Property], name: &str) -> Option<&'a Property> {
    props.iter().find(|p| p.name == name)
}

fn property_value<'a>(props: &'a [Property], name: &str) -> Option<&'a str> {
    find_property(props, name).and_then(|p| p.value.as_deref())
}

fn param_value<'a>(prop: &'a Property, name: &str) -> Option<&'a str> {
    prop.params.as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// Undo the TEXT escaping of RFC 5545
fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => result.push('\n'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}


#[cfg(test)]
mod test {
    use super::*;

    const EXAMPLE_FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//Example Corp//Public Holidays//EN\r
X-WR-CALNAME:Holidays\r
BEGIN:VEVENT\r
UID:new-year@example.com\r
DTSTART;VALUE=DATE:20240101\r
DTEND;VALUE=DATE:20240102\r
SUMMARY:New Year\\, again\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:standup@example.com\r
DTSTART;TZID=Europe/Paris:20240108T093000\r
DTEND;TZID=Europe/Paris:20240108T094500\r
RRULE:FREQ=WEEKLY;BYDAY=MO\r
EXDATE;TZID=Europe/Paris:20240115T093000\r
SUMMARY:Standup\r
LOCATION:Room 4\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:standup@example.com\r
RECURRENCE-ID;TZID=Europe/Paris:20240122T093000\r
DTSTART;TZID=Europe/Paris:20240122T110000\r
SUMMARY:Standup (moved)\r
END:VEVENT\r
BEGIN:VEVENT\r
DTSTART:20240110T120000Z\r
SUMMARY:No uid\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:broken@example.com\r
SUMMARY:No start\r
END:VEVENT\r
END:VCALENDAR\r
";

    fn parsed() -> ParsedFeed {
        parse_feed(EXAMPLE_FEED, &DisplayZone::default()).unwrap()
    }

    #[test]
    fn test_feed_parsing() {
        let feed = parsed();
        assert_eq!(feed.name.as_deref(), Some("Holidays"));
        // The event without DTSTART is dropped, the override is kept as a single occurrence
        assert_eq!(feed.components.len(), 4);

        let new_year = feed.components[0].details();
        assert_eq!(new_year.summary, "New Year, again");
        assert!(new_year.all_day);
        // Midnight in Shanghai
        assert_eq!(new_year.start, Utc.with_ymd_and_hms(2023, 12, 31, 16, 0, 0).unwrap());
    }

    #[test]
    fn test_recurring_component() {
        let feed = parsed();
        let standup = match &feed.components[1] {
            FeedComponent::Recurring(r) => r,
            other => panic!("unexpected component {:?}", other),
        };
        assert_eq!(standup.rule, "FREQ=WEEKLY;BYDAY=MO");
        assert_eq!(standup.start_tz, Some(chrono_tz::Europe::Paris));
        assert_eq!(standup.details.start, Utc.with_ymd_and_hms(2024, 1, 8, 8, 30, 0).unwrap());
        assert_eq!(standup.details.location.as_deref(), Some("Room 4"));
        // The EXDATE and the overridden occurrence
        assert_eq!(standup.exdates, vec![
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 22, 8, 30, 0).unwrap(),
        ]);
    }

    #[test]
    fn test_override_and_missing_uid() {
        let feed = parsed();
        let moved = feed.components[3].details();
        assert_eq!(moved.summary, "Standup (moved)");
        assert_eq!(moved.key, format!("standup@example.com-{}", Utc.with_ymd_and_hms(2024, 1, 22, 8, 30, 0).unwrap().timestamp()));

        let no_uid = feed.components[2].details();
        assert_eq!(no_uid.key, format!("No uid-{}", Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap().timestamp()));
    }

    #[test]
    fn test_all_day_recurrence_with_an_end_date() {
        let feed = "BEGIN:VCALENDAR\r
VERSION:2.0\r
BEGIN:VEVENT\r
UID:weekly-review@example.com\r
DTSTART;VALUE=DATE:20240101\r
RRULE:FREQ=WEEKLY;UNTIL=20240131\r
SUMMARY:Weekly review\r
END:VEVENT\r
END:VCALENDAR\r
";
        let zone = DisplayZone::new(chrono_tz::UTC);
        let parsed = parse_feed(feed, &zone).unwrap();
        let review = match &parsed.components[0] {
            FeedComponent::Recurring(r) => r,
            other => panic!("unexpected component {:?}", other),
        };
        assert!(review.details.all_day);

        let days: Vec<String> = review.occurrences_between(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ).unwrap()
            .iter()
            .map(|occurrence| zone.instance_date(*occurrence))
            .collect();
        assert_eq!(days, vec!["2024-01-01", "2024-01-08", "2024-01-15", "2024-01-22", "2024-01-29"]);
    }

    #[test]
    fn test_not_a_calendar() {
        let err = parse_feed("<html><body>Not found</body></html>", &DisplayZone::default()).unwrap_err();
        assert!(matches!(err, FeedError::Unparsable(_)));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\, b\\; c\\nd\\\\e"), "a, b; c\nd\\e");
    }
}
