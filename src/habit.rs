//! Periodic habits

use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveTime, Utc};

/// How often a habit should be performed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frequency {
    Daily,
    /// Only on some days of the week (0 is Sunday, 6 is Saturday)
    #[serde(rename_all = "camelCase")]
    Weekly { target_days: Vec<u32> },
}

impl Frequency {
    /// Whether a habit with this frequency is due on a given weekday (0 is Sunday)
    pub fn matches_weekday(&self, weekday: u32) -> bool {
        match self {
            Frequency::Daily => true,
            Frequency::Weekly{ target_days } => target_days.contains(&weekday),
        }
    }
}

/// A habit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    id: String,
    name: String,
    frequency: Frequency,
    #[serde(default = "default_active")]
    active: bool,
    /// Wall-clock time of the display zone
    #[serde(default)]
    reminder_time: Option<NaiveTime>,
    space: String,
    owner: String,
    created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Habit {
    pub fn new(id: String, name: String, frequency: Frequency, space: String, owner: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id, name, frequency,
            active: true,
            reminder_time: None,
            space, owner, created_at,
        }
    }

    pub fn id(&self) -> &str    { &self.id    }
    pub fn name(&self) -> &str  { &self.name  }
    pub fn space(&self) -> &str { &self.space }
    pub fn owner(&self) -> &str { &self.owner }
    pub fn active(&self) -> bool { self.active }
    pub fn frequency(&self) -> &Frequency            { &self.frequency }
    pub fn reminder_time(&self) -> Option<NaiveTime> { self.reminder_time }
    pub fn created_at(&self) -> &DateTime<Utc>       { &self.created_at }

    pub fn with_reminder_time(mut self, reminder_time: NaiveTime) -> Self {
        self.reminder_time = Some(reminder_time);
        self
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}
