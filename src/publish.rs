//! Publication of a user's own tasks and habits as a subscribable iCal feed
//!
//! Feeds are not protected by a session: anyone holding the link can read it.
//! The link therefore embeds a token derived from the user id and a server secret, which is checked before anything is read.

use std::error::Error;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::config::{Settings, PRODUCT_NAME};
use crate::ical::build_feed;
use crate::timezone::DisplayZone;
use crate::traits::{Clock, EntityStore};

/// Why a feed could not be rendered
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    #[error("invalid feed token")]
    Unauthorized,
    #[error("unable to read the items to publish: {0}")]
    Storage(String),
}

/// The token of a user's feed: the hex SHA-256 of `user_id + secret`
pub fn feed_token(user_id: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time byte comparison, so that response times do not leak how much of a token was right
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Where a user can subscribe to their feed
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedLink {
    pub url: Url,
    /// The same link with the `webcal` scheme, which most calendar apps open directly
    pub webcal_url: String,
    pub instructions: String,
}

/// Renders the outbound feeds
pub struct FeedPublisher<S> {
    store: S,
    secret: String,
    base_url: Url,
    zone: DisplayZone,
    clock: Arc<dyn Clock>,
}

impl<S> FeedPublisher<S>
where
    S: EntityStore + Send + Sync,
{
    pub fn new(store: S, settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self, Box<dyn Error>> {
        settings.validate()?;
        Ok(Self {
            store,
            secret: settings.server_secret.clone(),
            base_url: settings.public_base_url()?,
            zone: DisplayZone::new(settings.timezone()?),
            clock,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn token_for(&self, user_id: &str) -> String {
        feed_token(user_id, &self.secret)
    }

    pub fn is_valid_token(&self, user_id: &str, token: &str) -> bool {
        constant_time_eq(self.token_for(user_id).as_bytes(), token.as_bytes())
    }

    /// The subscription link of a user
    pub fn feed_url(&self, user_id: &str) -> Result<FeedLink, url::ParseError> {
        let mut url = self.base_url.join("api/calendar/feed/")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(&format!("{}.ics", user_id));
        url.query_pairs_mut().append_pair("token", &self.token_for(user_id));

        let webcal_url = format!("webcal{}", &url.as_str()[url.scheme().len()..]);

        Ok(FeedLink {
            instructions: format!(
                "Subscribe to {} from your calendar app (Google Calendar: \"Other calendars\" > \"From URL\"; Apple Calendar: \"File\" > \"New Calendar Subscription\"). Keep this link private: anyone who has it can read your tasks.",
                url
            ),
            url,
            webcal_url,
        })
    }

    /// Render the feed of a user, after having checked the token
    pub async fn render_feed(&self, user_id: &str, token: &str) -> Result<String, PublishError> {
        if self.is_valid_token(user_id, token) == false {
            log::info!("Rejecting a feed request for user {} with an invalid token", user_id);
            return Err(PublishError::Unauthorized);
        }

        let tasks = self.store.tasks_of_owner(user_id).await
            .map_err(|err| PublishError::Storage(err.to_string()))?;
        let habits = self.store.habits_of_owner(user_id).await
            .map_err(|err| PublishError::Storage(err.to_string()))?;
        log::debug!("Publishing {} tasks and {} habits for user {}", tasks.len(), habits.len(), user_id);

        let calendar_name = PRODUCT_NAME.lock().map(|s| s.clone()).unwrap_or_default();
        Ok(build_feed(&calendar_name, &tasks, &habits, &self.zone, self.clock.now()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use chrono::{TimeZone, Utc};

    use crate::clock::FixedClock;
    use crate::mock_behaviour::MockBehaviour;
    use crate::store::MemoryStore;
    use crate::Task;

    fn settings() -> Settings {
        Settings {
            server_secret: "s3cret".to_string(),
            public_base_url: "https://tasks.example.com/".to_string(),
            ..Settings::default()
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    #[test]
    fn token_is_a_pure_function() {
        assert_eq!(feed_token("alice", "s3cret"), feed_token("alice", "s3cret"));
        assert_ne!(feed_token("alice", "s3cret"), feed_token("alice", "other"));
        assert_ne!(feed_token("alice", "s3cret"), feed_token("bob", "s3cret"));
        assert_eq!(feed_token("alice", "s3cret").len(), 64);
        // sha256("abc")
        assert_eq!(feed_token("ab", "c"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn feed_link() {
        let publisher = FeedPublisher::new(MemoryStore::new(), &settings(), clock()).unwrap();
        let link = publisher.feed_url("alice").unwrap();
        let token = feed_token("alice", "s3cret");
        assert_eq!(link.url.as_str(), format!("https://tasks.example.com/api/calendar/feed/alice.ics?token={}", token));
        assert_eq!(link.webcal_url, format!("webcal://tasks.example.com/api/calendar/feed/alice.ics?token={}", token));
        assert!(link.instructions.contains(link.url.as_str()));
    }

    #[test]
    fn user_ids_stay_in_their_path_segment() {
        let publisher = FeedPublisher::new(MemoryStore::new(), &settings(), clock()).unwrap();

        let link = publisher.feed_url("../admin/bob").unwrap();
        assert_eq!(link.url.path(), "/api/calendar/feed/..%2Fadmin%2Fbob.ics");

        let link = publisher.feed_url("..").unwrap();
        assert_eq!(link.url.path(), "/api/calendar/feed/...ics");
    }

    #[tokio::test]
    async fn invalid_tokens_are_rejected_before_reading_the_store() {
        let mut store = MemoryStore::new();
        let behaviour = Arc::new(Mutex::new(MockBehaviour{ read_entities_behaviour: (0, 1), ..MockBehaviour::default() }));
        store.set_mock_behaviour(Some(Arc::clone(&behaviour)));
        let publisher = FeedPublisher::new(store, &settings(), clock()).unwrap();

        assert_eq!(publisher.render_feed("alice", "nope").await, Err(PublishError::Unauthorized));
        assert_eq!(publisher.render_feed("alice", &feed_token("bob", "s3cret")).await, Err(PublishError::Unauthorized));
        // The store has not been touched: its single planned failure is still pending
        assert_eq!(behaviour.lock().unwrap().read_entities_behaviour, (0, 1));

        let token = feed_token("alice", "s3cret");
        assert!(matches!(publisher.render_feed("alice", &token).await, Err(PublishError::Storage(_))));
        assert!(publisher.render_feed("alice", &token).await.is_ok());
    }

    #[tokio::test]
    async fn feed_contains_only_the_owner_items() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut store = MemoryStore::new();
        store.add_task(Task::new_with_id("a1".into(), "Alice's".into(), "home".into(), "alice".into(), created).with_due_date(created));
        store.add_task(Task::new_with_id("b1".into(), "Bob's".into(), "home".into(), "bob".into(), created).with_due_date(created));
        let publisher = FeedPublisher::new(store, &settings(), clock()).unwrap();

        let ical = publisher.render_feed("alice", &feed_token("alice", "s3cret")).await.unwrap();
        assert!(ical.contains("UID:task-a1\r\n"));
        assert!(ical.contains("UID:task-b1") == false);
    }
}
