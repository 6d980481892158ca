//! The unified calendar item returned to callers

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::subscription::SubscriptionLink;
use crate::task::{Priority, Subtask};

/// Where a calendar event comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Task,
    Habit,
    External,
}

/// A concrete calendar item.
///
/// These are built fresh for every query and are never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    /// For local items, the id of the task or habit; for external items, the component key (plus the occurrence epoch for recurring ones)
    pub id: String,
    pub title: String,
    pub kind: EventKind,
    /// Only `None` for unscheduled tasks (tasks without due date)
    pub due: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub completed: bool,
    pub completable: bool,
    /// The display-zone `YYYY-MM-DD` day of this instance, used as its completion key
    pub instance_date: Option<String>,
    pub recurring: bool,

    pub subscription: Option<SubscriptionLink>,

    pub priority: Option<Priority>,
    pub labels: Vec<String>,
    pub subtasks: Vec<Subtask>,
    pub description: Option<String>,
    pub location: Option<String>,
}

impl CalendarEvent {
    /// A bare event of the given kind; callers fill in what they know
    pub fn new(id: String, title: String, kind: EventKind) -> Self {
        Self {
            id, title, kind,
            due: None,
            end: None,
            all_day: false,
            completed: false,
            completable: kind != EventKind::External,
            instance_date: None,
            recurring: false,
            subscription: None,
            priority: None,
            labels: Vec::new(),
            subtasks: Vec::new(),
            description: None,
            location: None,
        }
    }

    /// The key identifying an instance within one aggregation result
    pub fn instance_key(&self) -> (EventKind, &str, Option<&str>) {
        (self.kind, &self.id, self.instance_date.as_deref())
    }

    pub fn is_external(&self) -> bool {
        self.kind == EventKind::External
    }
}
