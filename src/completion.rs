//! Per-instance completion records
//!
//! A recurring task has many occurrences, each of which can be completed on its own.
//! Completion is therefore keyed by `(entity id, instance date)`, independently of any flag on the entity itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionMap {
    /// entity id -> instance date -> completed
    records: HashMap<String, HashMap<String, bool>>,
}

impl CompletionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the completion state of one instance
    pub fn set(&mut self, entity_id: &str, instance_date: &str, completed: bool) {
        self.records
            .entry(entity_id.to_string())
            .or_default()
            .insert(instance_date.to_string(), completed);
    }

    /// The recorded state of an instance, if any record exists for it
    pub fn get(&self, entity_id: &str, instance_date: &str) -> Option<bool> {
        self.records
            .get(entity_id)
            .and_then(|dates| dates.get(instance_date))
            .copied()
    }

    pub fn is_completed(&self, entity_id: &str, instance_date: &str) -> bool {
        self.get(entity_id, instance_date).unwrap_or(false)
    }

    /// The instance dates of an entity that are currently completed
    pub fn completed_dates(&self, entity_id: &str) -> Vec<&str> {
        let mut dates: Vec<&str> = match self.records.get(entity_id) {
            None => Vec::new(),
            Some(dates) => dates.iter()
                .filter(|(_, completed)| **completed)
                .map(|(date, _)| date.as_str())
                .collect(),
        };
        dates.sort_unstable();
        dates
    }

    /// Keep only the records of the given entities
    pub fn restricted_to(&self, entity_ids: &[String]) -> Self {
        let records = entity_ids.iter()
            .filter_map(|id| self.records.get(id).map(|dates| (id.clone(), dates.clone())))
            .collect();
        Self { records }
    }

    /// Add every record of `other`, overwriting existing ones
    pub fn extend(&mut self, other: CompletionMap) {
        for (id, dates) in other.records {
            self.records.entry(id).or_default().extend(dates);
        }
    }
}
