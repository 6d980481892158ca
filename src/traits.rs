//! Traits at the boundaries of the calendar engine
//!
//! Storage, completion records, feed transport and time are all provided by the caller, so that the engine itself stays free of I/O decisions.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::completion::CompletionMap;
use crate::client::FeedError;
use crate::subscription::Subscription;
use crate::Habit;
use crate::Task;

/// Read access to the records owned by the storage subsystem
#[async_trait]
pub trait EntityStore {
    /// Every task of a space
    async fn tasks_in_space(&self, space: &str) -> Result<Vec<Task>, Box<dyn Error>>;
    /// Every habit of a space (active or not)
    async fn habits_in_space(&self, space: &str) -> Result<Vec<Habit>, Box<dyn Error>>;
    /// Every external subscription of a space (enabled or not)
    async fn subscriptions_in_space(&self, space: &str) -> Result<Vec<Subscription>, Box<dyn Error>>;

    /// Every task owned by a user, whatever its space
    async fn tasks_of_owner(&self, owner: &str) -> Result<Vec<Task>, Box<dyn Error>>;
    /// Every habit owned by a user, whatever its space
    async fn habits_of_owner(&self, owner: &str) -> Result<Vec<Habit>, Box<dyn Error>>;
}

/// Supplies the per-instance completion records
#[async_trait]
pub trait CompletionSource {
    /// Returns the completion records of the given entities
    async fn completions_for(&self, entity_ids: &[String]) -> Result<CompletionMap, Box<dyn Error>>;
}

#[async_trait]
impl<T: EntityStore + Send + Sync> EntityStore for Arc<T> {
    async fn tasks_in_space(&self, space: &str) -> Result<Vec<Task>, Box<dyn Error>> {
        (**self).tasks_in_space(space).await
    }
    async fn habits_in_space(&self, space: &str) -> Result<Vec<Habit>, Box<dyn Error>> {
        (**self).habits_in_space(space).await
    }
    async fn subscriptions_in_space(&self, space: &str) -> Result<Vec<Subscription>, Box<dyn Error>> {
        (**self).subscriptions_in_space(space).await
    }
    async fn tasks_of_owner(&self, owner: &str) -> Result<Vec<Task>, Box<dyn Error>> {
        (**self).tasks_of_owner(owner).await
    }
    async fn habits_of_owner(&self, owner: &str) -> Result<Vec<Habit>, Box<dyn Error>> {
        (**self).habits_of_owner(owner).await
    }
}

#[async_trait]
impl<T: CompletionSource + Send + Sync> CompletionSource for Arc<T> {
    async fn completions_for(&self, entity_ids: &[String]) -> Result<CompletionMap, Box<dyn Error>> {
        (**self).completions_for(entity_ids).await
    }
}

/// Transport used to download an external calendar feed
#[async_trait]
pub trait FeedFetcher {
    /// Download the raw body of a feed
    async fn fetch(&self, url: &Url) -> Result<String, FeedError>;
}

/// Where "now" comes from
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
