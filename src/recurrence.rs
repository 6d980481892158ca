//! Expansion of recurring tasks into dated instances
//!
//! Expansion works on display-zone calendar days. A recurring task produces at most one instance per day,
//! always at the wall-clock time of its anchor, and never outside of
//! `[max(window start, anchor), min(window end, recurrence end date)]` (both bounds compared as days).

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::completion::CompletionMap;
use crate::event::{CalendarEvent, EventKind};
use crate::timezone::DisplayZone;
use crate::Task;

/// How a task repeats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    None,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    EndOfMonth,
    Yearly,
}

impl Default for RecurrencePattern {
    fn default() -> Self {
        RecurrencePattern::None
    }
}

impl RecurrencePattern {
    pub fn is_recurring(&self) -> bool {
        *self != RecurrencePattern::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::None => "none",
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Biweekly => "biweekly",
            RecurrencePattern::Monthly => "monthly",
            RecurrencePattern::EndOfMonth => "end_of_month",
            RecurrencePattern::Yearly => "yearly",
        }
    }
}

impl Display for RecurrencePattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecurrencePattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(RecurrencePattern::None),
            "daily" => Ok(RecurrencePattern::Daily),
            "weekly" => Ok(RecurrencePattern::Weekly),
            "biweekly" => Ok(RecurrencePattern::Biweekly),
            "monthly" => Ok(RecurrencePattern::Monthly),
            "end_of_month" => Ok(RecurrencePattern::EndOfMonth),
            "yearly" => Ok(RecurrencePattern::Yearly),
            other => Err(format!("Unknown recurrence pattern {:?}", other)),
        }
    }
}

/// Deserialize a recurrence pattern, turning unknown values into [`RecurrencePattern::None`].
///
/// A task with a malformed pattern is still shown, as a single (non-recurring) instance.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<RecurrencePattern, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None => RecurrencePattern::None,
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            log::warn!("{}. Treating it as a non-recurring task", err);
            RecurrencePattern::None
        }),
    })
}


/// Turns tasks into the concrete instances that fall in a time window
#[derive(Clone, Copy, Debug, Default)]
pub struct Expander {
    zone: DisplayZone,
}

impl Expander {
    pub fn new(zone: DisplayZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> &DisplayZone {
        &self.zone
    }

    /// Expand every task into the calendar events of `[window_start, window_end]`
    pub fn expand(&self, tasks: &[Task], window_start: DateTime<Utc>, window_end: DateTime<Utc>, completions: &CompletionMap) -> Vec<CalendarEvent> {
        let mut events = Vec::new();
        for task in tasks {
            let occurrences = self.occurrences(task, window_start, window_end);
            log::trace!("Task {} has {} instance(s) in the window", task.id(), occurrences.len());
            events.extend(
                occurrences.into_iter().map(|instant| self.instance_event(task, instant, completions))
            );
        }
        events
    }

    /// The instants of every instance of a task within `[window_start, window_end]`
    pub fn occurrences(&self, task: &Task, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        if window_end < window_start {
            return Vec::new();
        }

        if task.is_recurring() == false {
            return match task.due_date() {
                Some(due) if *due >= window_start && *due <= window_end => vec![*due],
                _ => Vec::new(),
            };
        }

        let anchor = task.anchor();
        let anchor_date = self.zone.date_of(anchor);
        let anchor_time = self.zone.time_of(anchor);

        let start_date = anchor_date.max(self.zone.date_of(window_start));
        let mut end_date = self.zone.date_of(window_end);
        if let Some(until) = task.recurrence_end_date() {
            end_date = end_date.min(self.zone.date_of(*until));
        }
        if start_date > end_date {
            return Vec::new();
        }

        let dates = match task.recurrence_pattern() {
            RecurrencePattern::None => Vec::new(),
            RecurrencePattern::Daily => days_matching(start_date, end_date, |_| true),
            RecurrencePattern::Weekly => days_matching(start_date, end_date, |day| {
                day.weekday() == anchor_date.weekday()
            }),
            RecurrencePattern::Biweekly => days_matching(start_date, end_date, |day| {
                day.weekday() == anchor_date.weekday()
                    && ((*day - anchor_date).num_days() / 7) % 2 == 0
            }),
            RecurrencePattern::Monthly => months_matching(anchor_date, start_date, end_date, |year, month| {
                NaiveDate::from_ymd_opt(year, month, anchor_date.day())
            }),
            RecurrencePattern::EndOfMonth => months_matching(anchor_date, start_date, end_date, last_day_of_month),
            RecurrencePattern::Yearly => years_matching(anchor_date, start_date, end_date),
        };

        dates.into_iter()
            .filter_map(|date| self.at_anchor_time(date, anchor_time))
            .collect()
    }

    fn at_anchor_time(&self, date: NaiveDate, anchor_time: NaiveTime) -> Option<DateTime<Utc>> {
        let instant = self.zone.resolve_local(date.and_time(anchor_time));
        if instant.is_none() {
            log::warn!("Unable to place an instance on {} at {}", date, anchor_time);
        }
        instant
    }

    fn instance_event(&self, task: &Task, instant: DateTime<Utc>, completions: &CompletionMap) -> CalendarEvent {
        let instance_date = self.zone.instance_date(instant);
        let completed = match task.is_recurring() {
            true => completions.is_completed(task.id(), &instance_date),
            false => completions.get(task.id(), &instance_date).unwrap_or_else(|| task.completed()),
        };

        let mut event = CalendarEvent::new(task.id().to_string(), task.title().to_string(), EventKind::Task);
        event.due = Some(instant);
        event.completed = completed;
        event.instance_date = Some(instance_date);
        event.recurring = task.is_recurring();
        event.priority = task.priority();
        event.labels = task.labels().to_vec();
        event.subtasks = task.subtasks().to_vec();
        event.description = task.description().map(String::from);
        event
    }
}

/// Walk every day of `[start, end]`, stopping as soon as `end` is passed
fn days_matching<F>(start: NaiveDate, end: NaiveDate, predicate: F) -> Vec<NaiveDate>
where
    F: Fn(&NaiveDate) -> bool,
{
    let mut dates = Vec::new();
    let mut day = start;
    while day <= end {
        if predicate(&day) {
            dates.push(day);
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    dates
}

/// Step month by month from the anchor's month, keeping the candidates `candidate_for(year, month)` that fall in `[start, end]`.
/// Months for which there is no candidate (e.g. the 31st of April) are skipped.
fn months_matching<F>(anchor: NaiveDate, start: NaiveDate, end: NaiveDate, candidate_for: F) -> Vec<NaiveDate>
where
    F: Fn(i32, u32) -> Option<NaiveDate>,
{
    let anchor_index = month_index(anchor);
    // Months before the window cannot produce anything
    let mut index = anchor_index.max(month_index(start) - 1);

    let mut dates = Vec::new();
    loop {
        let (year, month) = from_month_index(index);
        let first_of_month = match NaiveDate::from_ymd_opt(year, month, 1) {
            Some(d) => d,
            None => break,
        };
        if first_of_month > end {
            break;
        }
        if let Some(candidate) = candidate_for(year, month) {
            if candidate > end {
                break;
            }
            if candidate >= start && candidate >= anchor {
                dates.push(candidate);
            }
        }
        index += 1;
    }
    dates
}

/// Step year by year from the anchor, keeping its month and day.
/// February 29th only happens in leap years.
fn years_matching(anchor: NaiveDate, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut year = anchor.year().max(start.year() - 1);
    loop {
        let first_of_month = match NaiveDate::from_ymd_opt(year, anchor.month(), 1) {
            Some(d) => d,
            None => break,
        };
        if first_of_month > end {
            break;
        }
        if let Some(candidate) = NaiveDate::from_ymd_opt(year, anchor.month(), anchor.day()) {
            if candidate > end {
                break;
            }
            if candidate >= start && candidate >= anchor {
                dates.push(candidate);
            }
        }
        year += 1;
    }
    dates
}

fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

fn from_month_index(index: i64) -> (i32, u32) {
    ((index.div_euclid(12)) as i32, (index.rem_euclid(12) + 1) as u32)
}

/// The last calendar day of a month
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}
