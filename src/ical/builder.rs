//! A module to build the outbound iCal feed

use chrono::{DateTime, NaiveDate, Utc};
use ics::properties::{Categories, Description, DtStart, Priority as IcsPriority, RRule, Summary};
use ics::components::{Parameter, Property};
use ics::{escape_text, Event, ICalendar};

use crate::habit::{Frequency, Habit};
use crate::recurrence::RecurrencePattern;
use crate::task::{Priority, Task};
use crate::timezone::DisplayZone;

/// The `RRULE` value of a recurrence pattern, `None` for non-recurring items.
///
/// `until` is appended as a bare date (`UNTIL=YYYYMMDD`), without time or zone.
pub fn recurrence_rule(pattern: RecurrencePattern, until: Option<NaiveDate>) -> Option<String> {
    let rule = match pattern {
        RecurrencePattern::None => return None,
        RecurrencePattern::Daily => "FREQ=DAILY",
        RecurrencePattern::Weekly => "FREQ=WEEKLY",
        RecurrencePattern::Biweekly => "FREQ=WEEKLY;INTERVAL=2",
        RecurrencePattern::Monthly => "FREQ=MONTHLY",
        RecurrencePattern::EndOfMonth => "FREQ=MONTHLY;BYMONTHDAY=-1",
        RecurrencePattern::Yearly => "FREQ=YEARLY",
    };
    Some(match until {
        None => rule.to_string(),
        Some(date) => format!("{};UNTIL={}", rule, date.format("%Y%m%d")),
    })
}

/// The `RRULE` value of a habit, `None` when the habit can never happen
fn habit_rule(frequency: &Frequency) -> Option<String> {
    const DAYS: [&str; 7] = ["SU", "MO", "TU", "WE", "TH", "FR", "SA"];
    match frequency {
        Frequency::Daily => Some("FREQ=DAILY".to_string()),
        Frequency::Weekly{ target_days } => {
            let mut days: Vec<u32> = target_days.iter().copied().filter(|d| *d < 7).collect();
            days.sort_unstable();
            days.dedup();
            if days.is_empty() {
                return None;
            }
            let by_day: Vec<&str> = days.iter().map(|d| DAYS[*d as usize]).collect();
            Some(format!("FREQ=WEEKLY;BYDAY={}", by_day.join(",")))
        },
    }
}

/// Build the subscribable document of a user.
///
/// Non-recurring tasks without a due date and inactive habits are left out.
pub fn build_feed(calendar_name: &str, tasks: &[Task], habits: &[Habit], zone: &DisplayZone, stamp: DateTime<Utc>) -> String {
    let s_stamp = format_date_time(&stamp);

    let mut calendar = ICalendar::new("2.0", super::default_prod_id());
    calendar.push(Property::new("X-WR-CALNAME", escape_text(calendar_name)));
    calendar.push(Property::new("CALSCALE", "GREGORIAN"));

    for task in tasks {
        let start = match (task.due_date(), task.is_recurring()) {
            (Some(due), _) => *due,
            (None, true) => task.anchor(),
            (None, false) => continue,
        };

        let mut event = Event::new(format!("task-{}", task.id()), s_stamp.clone());
        event.push(DtStart::new(format_date_time(&start)));
        event.push(Summary::new(escape_text(task.title())));
        if let Some(description) = task.description() {
            event.push(Description::new(escape_text(description)));
        }
        if task.labels().is_empty() == false {
            let labels: Vec<String> = task.labels().iter().map(|l| escape_text(l).into_owned()).collect();
            event.push(Categories::new(labels.join(",")));
        }
        if let Some(priority) = task.priority() {
            event.push(IcsPriority::new(ical_priority(priority)));
        }

        let until = task.recurrence_end_date().map(|end| zone.date_of(*end));
        if let Some(rule) = recurrence_rule(task.recurrence_pattern(), until) {
            event.push(RRule::new(rule));
        }
        calendar.add_event(event);
    }

    for habit in habits.iter().filter(|h| h.active()) {
        let rule = match habit_rule(habit.frequency()) {
            None => {
                log::debug!("Habit {} has no target day, leaving it out of the feed", habit.id());
                continue;
            },
            Some(rule) => rule,
        };

        let first_day = zone.date_of(*habit.created_at());
        let mut event = Event::new(format!("habit-{}", habit.id()), s_stamp.clone());
        let start = habit.reminder_time()
            .and_then(|time| zone.resolve_local(first_day.and_time(time)));
        match start {
            Some(start) => event.push(DtStart::new(format_date_time(&start))),
            None => {
                let mut dtstart = DtStart::new(first_day.format("%Y%m%d").to_string());
                dtstart.add(Parameter::new("VALUE", "DATE"));
                event.push(dtstart);
            },
        }
        event.push(Summary::new(escape_text(habit.name())));
        event.push(RRule::new(rule));
        calendar.add_event(event);
    }

    calendar.to_string()
}

fn ical_priority(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "1",
        Priority::High => "3",
        Priority::Medium => "5",
        Priority::Low => "9",
    }
}

fn format_date_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use crate::config::{ORG_NAME, PRODUCT_NAME};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_rule_mapping() {
        let expected = [
            (RecurrencePattern::Daily, "FREQ=DAILY"),
            (RecurrencePattern::Weekly, "FREQ=WEEKLY"),
            (RecurrencePattern::Biweekly, "FREQ=WEEKLY;INTERVAL=2"),
            (RecurrencePattern::Monthly, "FREQ=MONTHLY"),
            (RecurrencePattern::EndOfMonth, "FREQ=MONTHLY;BYMONTHDAY=-1"),
            (RecurrencePattern::Yearly, "FREQ=YEARLY"),
        ];
        for (pattern, rule) in &expected {
            assert_eq!(recurrence_rule(*pattern, None).as_deref(), Some(*rule));
        }
        assert_eq!(recurrence_rule(RecurrencePattern::None, None), None);
    }

    #[test]
    fn test_until_is_a_bare_date() {
        let until = NaiveDate::from_ymd_opt(2024, 6, 30);
        assert_eq!(recurrence_rule(RecurrencePattern::Biweekly, until).as_deref(), Some("FREQ=WEEKLY;INTERVAL=2;UNTIL=20240630"));
    }

    #[test]
    fn test_habit_rules() {
        assert_eq!(habit_rule(&Frequency::Daily).as_deref(), Some("FREQ=DAILY"));
        assert_eq!(habit_rule(&Frequency::Weekly{ target_days: vec![5, 1, 1, 9] }).as_deref(), Some("FREQ=WEEKLY;BYDAY=MO,FR"));
        assert_eq!(habit_rule(&Frequency::Weekly{ target_days: Vec::new() }), None);
    }

    #[test]
    fn test_ical_from_task() {
        let zone = DisplayZone::new(chrono_tz::UTC);
        let stamp = utc(2024, 1, 1, 0);
        let task = Task::new_with_id("t1".into(), "Pay rent; then relax".into(), "home".into(), "alice".into(), stamp)
            .with_due_date(utc(2024, 1, 31, 9))
            .with_recurrence(RecurrencePattern::EndOfMonth, Some(utc(2024, 12, 31, 0)));

        let expected_ical = format!("BEGIN:VCALENDAR\r\n\
            VERSION:2.0\r\n\
            PRODID:-//{}//{}//EN\r\n\
            X-WR-CALNAME:Alice\r\n\
            CALSCALE:GREGORIAN\r\n\
            BEGIN:VEVENT\r\n\
            UID:task-t1\r\n\
            DTSTAMP:20240101T000000Z\r\n\
            DTSTART:20240131T090000Z\r\n\
            SUMMARY:Pay rent\\; then relax\r\n\
            RRULE:FREQ=MONTHLY;BYMONTHDAY=-1;UNTIL=20241231\r\n\
            END:VEVENT\r\n\
            END:VCALENDAR\r\n", ORG_NAME.lock().unwrap(), PRODUCT_NAME.lock().unwrap());

        let ical = build_feed("Alice", &[task], &[], &zone, stamp);
        assert_eq!(ical, expected_ical);
    }

    #[test]
    fn test_ical_skips_undated_tasks_and_inactive_habits() {
        let zone = DisplayZone::new(chrono_tz::UTC);
        let stamp = utc(2024, 1, 1, 0);
        let undated = Task::new_with_id("t2".into(), "Someday".into(), "home".into(), "alice".into(), stamp);
        let mut inactive = Habit::new("h0".into(), "Old habit".into(), Frequency::Daily, "home".into(), "alice".into(), stamp);
        inactive.set_active(false);
        let reading = Habit::new("h1".into(), "Read".into(), Frequency::Weekly{ target_days: vec![0, 6] }, "home".into(), "alice".into(), stamp)
            .with_reminder_time(NaiveTime::from_hms_opt(21, 0, 0).unwrap());
        let stretching = Habit::new("h2".into(), "Stretch".into(), Frequency::Daily, "home".into(), "alice".into(), stamp);

        let ical = build_feed("Alice", &[undated], &[inactive, reading, stretching], &zone, stamp);
        assert!(ical.contains("UID:task-t2") == false);
        assert!(ical.contains("UID:habit-h0") == false);
        assert!(ical.contains("UID:habit-h1\r\n"));
        assert!(ical.contains("DTSTART:20240101T210000Z\r\n"));
        assert!(ical.contains("RRULE:FREQ=WEEKLY;BYDAY=SU,SA\r\n"));
        assert!(ical.contains("DTSTART;VALUE=DATE:20240101\r\n"));
        assert_eq!(ical.matches("BEGIN:VEVENT").count(), 2);
    }
}
