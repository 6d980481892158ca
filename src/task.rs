//! To-do tasks, as stored by the board subsystem

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::recurrence::RecurrencePattern;

/// How urgent a task is
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// A checklist entry of a task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub done: bool,
}

/// A to-do task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,

    /// The anchor of the recurrence, if any
    #[serde(default)]
    due_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "crate::recurrence::deserialize_lenient")]
    recurrence_pattern: RecurrencePattern,
    /// No instance is generated past the display-zone day of this instant
    #[serde(default)]
    recurrence_end_date: Option<DateTime<Utc>>,

    /// The board column (status label) the task sits in
    #[serde(default)]
    column: String,
    #[serde(default)]
    completed: bool,

    space: String,
    owner: String,
    created_at: DateTime<Utc>,

    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    subtasks: Vec<Subtask>,
}


impl Task {
    /// Create a brand new Task.
    /// This will pick a new (random) task ID.
    pub fn new(title: String, space: String, owner: String) -> Self {
        let new_id = Uuid::new_v4().to_hyphenated().to_string();
        Self::new_with_id(new_id, title, space, owner, Utc::now())
    }

    /// Create a Task whose identity is already known (e.g. when loading it from storage)
    pub fn new_with_id(id: String, title: String, space: String, owner: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            description: None,
            due_date: None,
            recurrence_pattern: RecurrencePattern::None,
            recurrence_end_date: None,
            column: String::from("todo"),
            completed: false,
            space,
            owner,
            created_at,
            priority: None,
            labels: Vec::new(),
            subtasks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str         { &self.id          }
    pub fn title(&self) -> &str      { &self.title       }
    pub fn space(&self) -> &str      { &self.space       }
    pub fn owner(&self) -> &str      { &self.owner       }
    pub fn column(&self) -> &str     { &self.column      }
    pub fn completed(&self) -> bool  { self.completed    }
    pub fn description(&self) -> Option<&str>               { self.description.as_deref() }
    pub fn due_date(&self) -> Option<&DateTime<Utc>>        { self.due_date.as_ref() }
    pub fn recurrence_pattern(&self) -> RecurrencePattern   { self.recurrence_pattern }
    pub fn recurrence_end_date(&self) -> Option<&DateTime<Utc>> { self.recurrence_end_date.as_ref() }
    pub fn created_at(&self) -> &DateTime<Utc>              { &self.created_at }
    pub fn priority(&self) -> Option<Priority>              { self.priority }
    pub fn labels(&self) -> &[String]                       { &self.labels }
    pub fn subtasks(&self) -> &[Subtask]                    { &self.subtasks }

    pub fn is_recurring(&self) -> bool {
        self.recurrence_pattern.is_recurring()
    }

    /// The instant recurrence is computed from: the due date, or else the creation date
    pub fn anchor(&self) -> DateTime<Utc> {
        self.due_date.unwrap_or(self.created_at)
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_recurrence(mut self, pattern: RecurrencePattern, end_date: Option<DateTime<Utc>>) -> Self {
        self.recurrence_pattern = pattern;
        self.recurrence_end_date = end_date;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<Subtask>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// Move the task to another column
    pub fn set_column(&mut self, column: String) {
        self.column = column;
    }

    pub fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
    }
}
