//! This module provides a TTL-bound cache for parsed external feeds
//!
//! Entries are keyed by feed URL. Each key has its own async lock, which is held during the whole
//! "check freshness, fetch, store" sequence: concurrent requests for a cold URL wait for the first
//! fetch to complete and then share its result (success or failure), instead of all hitting the upstream server.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::client::FeedError;
use crate::ical::ParsedFeed;
use crate::traits::Clock;


/// A parsed feed, along with the time it has been downloaded
#[derive(Clone, Debug)]
struct CachedFeed {
    data: Arc<ParsedFeed>,
    fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct SlotState {
    cached: Option<CachedFeed>,
    /// The error of the latest fetch, only handed to the requests that were waiting for it
    last_failure: Option<FeedError>,
}

/// The cache entry of a single URL
#[derive(Default)]
struct Slot {
    /// Number of fetches that have completed for this URL
    generation: AtomicU64,
    state: tokio::sync::Mutex<SlotState>,
}

/// A cache of parsed external feeds
pub struct FeedCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<Url, Arc<Slot>>>,
}

impl FeedCache {
    /// Create an empty cache. Entries are considered fresh while `now - fetched_at < ttl`
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::max_value());
        Self {
            ttl,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached feed for `url` if it is still fresh, or run `fetch` and cache its result otherwise.
    ///
    /// Failed fetches are not cached: requests that were already waiting for that fetch get its error,
    /// the next ones will try again.
    pub async fn get_or_fetch<F, Fut>(&self, url: &Url, fetch: F) -> Result<Arc<ParsedFeed>, FeedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ParsedFeed, FeedError>>,
    {
        let slot = self.slot_for(url);
        let seen_generation = slot.generation.load(Ordering::SeqCst);
        let mut state = slot.state.lock().await;

        if let Some(cached) = state.cached.as_ref() {
            if self.is_fresh(cached) {
                log::debug!("Serving {} from the feed cache", url);
                return Ok(Arc::clone(&cached.data));
            }
        }
        if slot.generation.load(Ordering::SeqCst) != seen_generation {
            if let Some(err) = state.last_failure.as_ref() {
                log::debug!("The fetch of {} we were waiting for has failed", url);
                return Err(err.clone());
            }
        }

        log::debug!("Feed cache miss for {}", url);
        let result = fetch().await;
        slot.generation.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(feed) => {
                let data = Arc::new(feed);
                state.cached = Some(CachedFeed {
                    data: Arc::clone(&data),
                    fetched_at: self.clock.now(),
                });
                state.last_failure = None;
                Ok(data)
            },
            Err(err) => {
                state.last_failure = Some(err.clone());
                if state.cached.is_none() {
                    self.forget_slot(url, &slot);
                }
                Err(err)
            },
        }
    }

    /// The cached feed for `url`, only if it is still fresh
    pub async fn get(&self, url: &Url) -> Option<Arc<ParsedFeed>> {
        let slot = self.existing_slot(url)?;
        let state = slot.state.lock().await;
        state.cached.as_ref()
            .filter(|cached| self.is_fresh(cached))
            .map(|cached| Arc::clone(&cached.data))
    }

    /// Forget the cached feed of a URL, e.g. after its subscription has been edited
    pub fn invalidate(&self, url: &Url) {
        self.lock_slots().remove(url);
    }

    /// Drop every stale entry that is not being refreshed right now
    pub fn purge_expired(&self) {
        let mut slots = self.lock_slots();
        slots.retain(|_, slot| match slot.state.try_lock() {
            // Someone is fetching this one
            Err(_) => true,
            Ok(state) => match state.cached.as_ref() {
                None => false,
                Some(cached) => self.is_fresh(cached),
            },
        });
    }

    /// Number of URLs known to the cache
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, cached: &CachedFeed) -> bool {
        self.clock.now() - cached.fetched_at < self.ttl
    }

    fn slot_for(&self, url: &Url) -> Arc<Slot> {
        let mut slots = self.lock_slots();
        Arc::clone(slots.entry(url.clone()).or_insert_with(|| Arc::new(Slot::default())))
    }

    fn existing_slot(&self, url: &Url) -> Option<Arc<Slot>> {
        self.lock_slots().get(url).map(Arc::clone)
    }

    /// Remove the slot of `url`, unless it has been replaced in the meantime
    fn forget_slot(&self, url: &Url, slot: &Arc<Slot>) {
        let mut slots = self.lock_slots();
        if slots.get(url).map(|current| Arc::ptr_eq(current, slot)).unwrap_or(false) {
            slots.remove(url);
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<Url, Arc<Slot>>> {
        // The map is never left in an inconsistent state, a poisoned lock can be reused
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
