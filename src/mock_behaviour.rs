//! This module provides ways to tweak mocked stores and feed servers, so that they can return errors on some tests

use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::client::{normalize_feed_url, FeedError};
use crate::traits::FeedFetcher;

/// This stores some behaviour tweaks, that describe how a mocked instance will behave during a given test
///
/// So that a functions fails _n_ times after _m_ initial successes, set `(m, n)` for the suited parameter
#[derive(Default, Clone, Debug)]
pub struct MockBehaviour {
    /// If this is true, every action will be allowed
    pub is_suspended: bool,

    // From the FeedFetcher trait
    pub fetch_behaviour: (u32, u32),

    // From the EntityStore and CompletionSource traits
    pub read_entities_behaviour: (u32, u32),
    pub read_completions_behaviour: (u32, u32),
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items will fail at once, for `n_fails` times
    pub fn fail_now(n_fails: u32) -> Self {
        Self {
            is_suspended: false,
            fetch_behaviour: (0, n_fails),
            read_entities_behaviour: (0, n_fails),
            read_completions_behaviour: (0, n_fails),
        }
    }

    /// Suspend this mock behaviour until you call `resume`
    pub fn suspend(&mut self) {
        self.is_suspended = true;
    }
    /// Make this behaviour active again
    pub fn resume(&mut self) {
        self.is_suspended = false;
    }

    pub fn can_fetch(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.fetch_behaviour, "fetch")
    }
    pub fn can_read_entities(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.read_entities_behaviour, "read_entities")
    }
    pub fn can_read_completions(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.read_completions_behaviour, "read_completions")
    }
}


/// Return Ok(()) in case the value is `(1+, _)` or `(_, 0)`, or return Err and decrement otherwise
fn decrement(value: &mut (u32, u32), descr: &str) -> Result<(), Box<dyn Error>> {
    let remaining_successes = value.0;
    let remaining_failures = value.1;

    if remaining_successes > 0 {
        value.0 = value.0 - 1;
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    } else {
        if remaining_failures > 0 {
            value.1 = value.1 - 1;
            log::debug!("Mock behaviour: failing a {} ({:?})", descr, value);
            Err(format!("Mocked behaviour requires this {} to fail this time. ({:?})", descr, value).into())
        } else {
            log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
            Ok(())
        }
    }
}


/// A [`FeedFetcher`] that serves canned documents instead of doing HTTP requests.
///
/// Unknown URLs answer with a 404 status.
#[derive(Debug, Default)]
pub struct MockFeedFetcher {
    bodies: Mutex<HashMap<String, String>>,
    behaviour: Mutex<MockBehaviour>,
    delay: Mutex<Option<Duration>>,
    n_fetches: AtomicUsize,
}

impl MockFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            ..Self::default()
        }
    }

    /// Make `url` answer with `body`
    pub fn serve(&self, url: &str, body: &str) {
        lock(&self.bodies).insert(url.to_string(), body.to_string());
    }

    /// Make every request take `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn behaviour(&self) -> std::sync::MutexGuard<'_, MockBehaviour> {
        lock(&self.behaviour)
    }

    /// How many requests have been made so far (failed ones included)
    pub fn n_fetches(&self) -> usize {
        self.n_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for MockFeedFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FeedError> {
        self.n_fetches.fetch_add(1, Ordering::SeqCst);
        let target = normalize_feed_url(url)?;

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Err(err) = self.behaviour().can_fetch() {
            return Err(FeedError::Unreachable(err.to_string()));
        }

        let body = lock(&self.bodies).get(target.as_str()).cloned();
        body.ok_or(FeedError::HttpStatus(404))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mock_behaviour() {
        let mut ok = MockBehaviour::new();
        assert!(ok.can_fetch().is_ok());
        assert!(ok.can_fetch().is_ok());
        assert!(ok.can_fetch().is_ok());
        assert!(ok.can_read_entities().is_ok());

        let mut now = MockBehaviour::fail_now(2);
        assert!(now.can_fetch().is_err());
        assert!(now.can_read_entities().is_err());
        assert!(now.can_read_entities().is_err());
        assert!(now.can_fetch().is_err());
        assert!(now.can_fetch().is_ok());
        assert!(now.can_fetch().is_ok());
        assert!(now.can_read_entities().is_ok());

        let mut custom = MockBehaviour{
            fetch_behaviour: (0,1),
            read_completions_behaviour: (1,3),
            ..MockBehaviour::default()
        };
        assert!(custom.can_fetch().is_err());
        assert!(custom.can_fetch().is_ok());
        assert!(custom.can_fetch().is_ok());
        assert!(custom.can_read_completions().is_ok());
        assert!(custom.can_read_completions().is_err());
        assert!(custom.can_read_completions().is_err());
        assert!(custom.can_read_completions().is_err());
        assert!(custom.can_read_completions().is_ok());

        custom.fetch_behaviour = (0, 1);
        custom.suspend();
        assert!(custom.can_fetch().is_ok());
        custom.resume();
        assert!(custom.can_fetch().is_err());
    }

    #[tokio::test]
    async fn test_mock_fetcher() {
        let fetcher = MockFeedFetcher::new_with_behaviour(MockBehaviour{ fetch_behaviour: (1, 1), ..MockBehaviour::default() });
        fetcher.serve("https://example.com/a.ics", "BEGIN:VCALENDAR");
        let url: Url = "webcal://example.com/a.ics".parse().unwrap();

        assert_eq!(fetcher.fetch(&url).await.unwrap(), "BEGIN:VCALENDAR");
        assert!(matches!(fetcher.fetch(&url).await, Err(FeedError::Unreachable(_))));
        assert_eq!(fetcher.fetch(&"https://example.com/b.ics".parse().unwrap()).await, Err(FeedError::HttpStatus(404)));
        assert_eq!(fetcher.n_fetches(), 3);
    }
}
