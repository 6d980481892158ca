//! Some utility functions

use crate::event::{CalendarEvent, EventKind};
use crate::provider::progress::FailedSubscription;
use crate::timezone::DisplayZone;

/// A debug utility that pretty-prints an agenda
pub fn print_events(events: &[CalendarEvent], zone: &DisplayZone) {
    for event in events {
        println!("    {}", describe_event(event, zone));
    }
}

/// A debug utility that pretty-prints the subscriptions an aggregation had to skip
pub fn print_failures(failures: &[FailedSubscription]) {
    for failure in failures {
        println!("    ! {} ({}): {}", failure.name, failure.id, failure.reason);
    }
}

/// One line describing an event, with its due time in the display zone
pub fn describe_event(event: &CalendarEvent, zone: &DisplayZone) -> String {
    let completion = match (event.completable, event.completed) {
        (false, _) => " ",
        (true, true) => "✓",
        (true, false) => "·",
    };
    let kind = match event.kind {
        EventKind::Task => "T",
        EventKind::Habit => "H",
        EventKind::External => "E",
    };
    let when = match (event.due, event.all_day) {
        (None, _) => "(no due date)   ".to_string(),
        (Some(due), true) => format!("{}      ", zone.to_display_zone(due).format("%Y-%m-%d")),
        (Some(due), false) => zone.to_display_zone(due).format("%Y-%m-%d %H:%M").to_string(),
    };
    let source = match &event.subscription {
        Some(link) => format!(" [{}]", link.name),
        None => String::new(),
    };
    format!("{}{} {}  {}{}\t{}", completion, kind, when, event.title, source, event.id)
}
