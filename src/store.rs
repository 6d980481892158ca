//! This module provides an in-memory store for tasks, habits, subscriptions and completion records
//!
//! It can be loaded from and saved to a JSON file, which is what the command-line tool and the tests use.
//! Applications with a real database implement [`EntityStore`] and [`CompletionSource`] themselves.

use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::completion::CompletionMap;
use crate::mock_behaviour::MockBehaviour;
use crate::subscription::Subscription;
use crate::traits::{CompletionSource, EntityStore};
use crate::Habit;
use crate::Task;


/// An [`EntityStore`] and [`CompletionSource`] that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: StoredData,

    mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>,
}

#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct StoredData {
    tasks: Vec<Task>,
    habits: Vec<Habit>,
    subscriptions: Vec<Subscription>,
    completions: CompletionMap,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize a store from the content of a valid JSON file.
    /// Returns an error otherwise
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error>> {
        let data = match std::fs::File::open(path) {
            Err(err) => {
                return Err(format!("Unable to open file {:?}: {}", path, err).into());
            },
            Ok(file) => serde_json::from_reader(std::io::BufReader::new(file))?,
        };

        Ok(Self {
            data,
            mock_behaviour: None,
        })
    }

    /// Store the current content to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let file = std::fs::File::create(path)
            .map_err(|err| format!("Unable to save file {:?}: {}", path, err))?;
        serde_json::to_writer_pretty(file, &self.data)?;
        Ok(())
    }

    /// Make this store fail some of its reads, as described by `behaviour`
    pub fn set_mock_behaviour(&mut self, behaviour: Option<Arc<Mutex<MockBehaviour>>>) {
        self.mock_behaviour = behaviour;
    }

    pub fn add_task(&mut self, task: Task) {
        self.data.tasks.push(task);
    }

    pub fn add_habit(&mut self, habit: Habit) {
        self.data.habits.push(habit);
    }

    pub fn add_subscription(&mut self, subscription: Subscription) {
        self.data.subscriptions.push(subscription);
    }

    /// Record the completion state of one instance of a task or habit
    pub fn set_completion(&mut self, entity_id: &str, instance_date: &str, completed: bool) {
        self.data.completions.set(entity_id, instance_date, completed);
    }

    pub fn tasks(&self) -> &[Task] {
        &self.data.tasks
    }

    pub fn habits(&self) -> &[Habit] {
        &self.data.habits
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.data.subscriptions
    }

    fn check_entities(&self) -> Result<(), Box<dyn Error>> {
        match &self.mock_behaviour {
            None => Ok(()),
            Some(behaviour) => lock_behaviour(behaviour).can_read_entities(),
        }
    }

    fn check_completions(&self) -> Result<(), Box<dyn Error>> {
        match &self.mock_behaviour {
            None => Ok(()),
            Some(behaviour) => lock_behaviour(behaviour).can_read_completions(),
        }
    }
}

fn lock_behaviour(behaviour: &Mutex<MockBehaviour>) -> std::sync::MutexGuard<'_, MockBehaviour> {
    behaviour.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn tasks_in_space(&self, space: &str) -> Result<Vec<Task>, Box<dyn Error>> {
        self.check_entities()?;
        Ok(self.data.tasks.iter().filter(|t| t.space() == space).cloned().collect())
    }

    async fn habits_in_space(&self, space: &str) -> Result<Vec<Habit>, Box<dyn Error>> {
        self.check_entities()?;
        Ok(self.data.habits.iter().filter(|h| h.space() == space).cloned().collect())
    }

    async fn subscriptions_in_space(&self, space: &str) -> Result<Vec<Subscription>, Box<dyn Error>> {
        self.check_entities()?;
        Ok(self.data.subscriptions.iter().filter(|s| s.space() == space).cloned().collect())
    }

    async fn tasks_of_owner(&self, owner: &str) -> Result<Vec<Task>, Box<dyn Error>> {
        self.check_entities()?;
        Ok(self.data.tasks.iter().filter(|t| t.owner() == owner).cloned().collect())
    }

    async fn habits_of_owner(&self, owner: &str) -> Result<Vec<Habit>, Box<dyn Error>> {
        self.check_entities()?;
        Ok(self.data.habits.iter().filter(|h| h.owner() == owner).cloned().collect())
    }
}

#[async_trait]
impl CompletionSource for MemoryStore {
    async fn completions_for(&self, entity_ids: &[String]) -> Result<CompletionMap, Box<dyn Error>> {
        self.check_completions()?;
        Ok(self.data.completions.restricted_to(entity_ids))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::habit::Frequency;

    fn sample_store() -> MemoryStore {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut store = MemoryStore::new();
        store.add_task(Task::new_with_id("t1".into(), "Work task".into(), "work".into(), "alice".into(), created));
        store.add_task(Task::new_with_id("t2".into(), "Home task".into(), "home".into(), "alice".into(), created));
        store.add_task(Task::new_with_id("t3".into(), "Bob's task".into(), "work".into(), "bob".into(), created));
        store.add_habit(Habit::new("h1".into(), "Run".into(), Frequency::Daily, "home".into(), "alice".into(), created));
        store.set_completion("t1", "2024-01-01", true);
        store.set_completion("h1", "2024-01-01", true);
        store
    }

    #[tokio::test]
    async fn queries_filter_by_space_and_owner() {
        let store = sample_store();
        let work: Vec<String> = store.tasks_in_space("work").await.unwrap().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(work, vec!["t1", "t3"]);
        let alice: Vec<String> = store.tasks_of_owner("alice").await.unwrap().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(alice, vec!["t1", "t2"]);
        assert_eq!(store.habits_in_space("work").await.unwrap().len(), 0);
        assert_eq!(store.habits_of_owner("alice").await.unwrap().len(), 1);

        let completions = store.completions_for(&["t1".to_string()]).await.unwrap();
        assert!(completions.is_completed("t1", "2024-01-01"));
        assert_eq!(completions.is_completed("h1", "2024-01-01"), false);
    }

    #[tokio::test]
    async fn save_and_reload() {
        let store = sample_store();
        let path = std::env::temp_dir().join(format!("habitcal-store-{}.json", uuid::Uuid::new_v4().to_hyphenated()));
        store.save_to_file(&path).unwrap();

        let reloaded = MemoryStore::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(reloaded.data, store.data);
    }

    #[tokio::test]
    async fn mocked_failures() {
        let mut store = sample_store();
        store.set_mock_behaviour(Some(Arc::new(Mutex::new(MockBehaviour::fail_now(1)))));
        assert!(store.tasks_in_space("work").await.is_err());
        assert!(store.tasks_in_space("work").await.is_ok());
        assert!(store.completions_for(&[]).await.is_err());
    }
}
