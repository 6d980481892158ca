//! Ingestion of external calendar subscriptions
//!
//! Feeds are downloaded through the [`FeedCache`], parsed once, and turned into [`CalendarEvent`]s for a given window.
//! A subscription that cannot be fetched or parsed never breaks anything else: it simply contributes no event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::cache::FeedCache;
use crate::client::{normalize_feed_url, parse_feed_url, FeedError};
use crate::event::{CalendarEvent, EventKind};
use crate::ical::{parse_feed, EventDetails, FeedComponent, ParsedFeed};
use crate::subscription::{Subscription, SubscriptionLink};
use crate::timezone::DisplayZone;
use crate::traits::FeedFetcher;


/// What a successful subscription URL check found
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSummary {
    pub url: Url,
    /// The name the feed gives itself, handy to prefill the subscription name
    pub name: Option<String>,
    pub n_components: usize,
}

/// Fetches, caches, parses and normalizes external feeds
pub struct FeedIngestor<F> {
    fetcher: F,
    cache: FeedCache,
    zone: DisplayZone,
    fetch_timeout: Duration,
}

impl<F> FeedIngestor<F>
where
    F: FeedFetcher + Send + Sync,
{
    pub fn new(fetcher: F, cache: FeedCache, zone: DisplayZone, fetch_timeout: Duration) -> Self {
        Self { fetcher, cache, zone, fetch_timeout }
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Return the parsed content of a feed, from the cache when it is fresh enough
    pub async fn fetch_and_parse(&self, url: &Url) -> Result<Arc<ParsedFeed>, FeedError> {
        normalize_feed_url(url)?;
        self.cache.get_or_fetch(url, || async move {
            let body = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url)).await {
                Err(_elapsed) => return Err(FeedError::Timeout(self.fetch_timeout.as_secs())),
                Ok(body) => body?,
            };
            let feed = parse_feed(&body, &self.zone)?;
            log::info!("Fetched feed {} ({} components)", url, feed.components.len());
            Ok(feed)
        }).await
    }

    /// Check a URL a user wants to subscribe to, by fetching and parsing it the same way queries will
    pub async fn validate_subscription_url(&self, raw_url: &str) -> Result<FeedSummary, FeedError> {
        let url = parse_feed_url(raw_url)?;
        let feed = self.fetch_and_parse(&url).await?;
        Ok(FeedSummary {
            url,
            name: feed.name.clone(),
            n_components: feed.components.len(),
        })
    }

    /// The events a subscription contributes to `[window_start, window_end]`, or why it cannot contribute any
    pub async fn try_events_for(&self, subscription: &Subscription, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Result<Vec<CalendarEvent>, FeedError> {
        let feed = self.fetch_and_parse(subscription.feed_url()).await?;
        Ok(self.normalize(&feed, window_start, window_end, &subscription.link()))
    }

    /// Same as [`Self::try_events_for`], but a failing subscription is logged and yields no event
    pub async fn events_for(&self, subscription: &Subscription, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Vec<CalendarEvent> {
        match self.try_events_for(subscription, window_start, window_end).await {
            Ok(events) => events,
            Err(err) => {
                log::warn!("Unable to load subscription {} ({}): {}", subscription.name(), subscription.feed_url(), err);
                Vec::new()
            },
        }
    }

    /// Turn the components of a feed into the events of `[window_start, window_end]`
    pub fn normalize(&self, feed: &ParsedFeed, window_start: DateTime<Utc>, window_end: DateTime<Utc>, link: &SubscriptionLink) -> Vec<CalendarEvent> {
        let mut events = Vec::new();
        for component in &feed.components {
            match component {
                FeedComponent::Single(single) => {
                    if in_window(&single.details, window_start, window_end) {
                        events.push(self.external_event(&single.details, single.details.key.clone(), single.details.start, false, link));
                    }
                },
                FeedComponent::Recurring(recurring) => {
                    match recurring.occurrences_between(window_start, window_end) {
                        Ok(occurrences) => {
                            for occurrence in occurrences {
                                let id = format!("{}-{}", recurring.details.key, occurrence.timestamp());
                                events.push(self.external_event(&recurring.details, id, occurrence, true, link));
                            }
                        },
                        Err(err) => {
                            log::warn!("Unable to expand the recurrence of {} ({}), using its first occurrence only", recurring.details.key, err);
                            if in_window(&recurring.details, window_start, window_end) {
                                events.push(self.external_event(&recurring.details, recurring.details.key.clone(), recurring.details.start, false, link));
                            }
                        },
                    }
                },
            }
        }
        events
    }

    fn external_event(&self, details: &EventDetails, id: String, start: DateTime<Utc>, recurring: bool, link: &SubscriptionLink) -> CalendarEvent {
        let mut event = CalendarEvent::new(id, details.summary.clone(), EventKind::External);
        event.due = Some(start);
        event.end = details.end.map(|_| start + details.duration());
        event.all_day = details.all_day;
        event.completable = false;
        event.instance_date = Some(self.zone.instance_date(start));
        event.recurring = recurring;
        event.subscription = Some(link.clone());
        event.description = details.description.clone();
        event.location = details.location.clone();
        event
    }
}

fn in_window(details: &EventDetails, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
    details.start >= window_start && details.start <= window_end
}


#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use crate::clock::FixedClock;
    use crate::mock_behaviour::{MockBehaviour, MockFeedFetcher};

    const WEEKLY_FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
X-WR-CALNAME:Team\r
BEGIN:VEVENT\r
UID:standup\r
DTSTART:20240101T010000Z\r
DTEND:20240101T011500Z\r
RRULE:FREQ=WEEKLY\r
SUMMARY:Standup\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:party\r
DTSTART:20240110T100000Z\r
SUMMARY:Party\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:weird\r
DTSTART:20240111T100000Z\r
RRULE:FREQ=NEVER\r
SUMMARY:Weird rule\r
END:VEVENT\r
END:VCALENDAR\r
";

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn ingestor(fetcher: MockFeedFetcher) -> (FeedIngestor<MockFeedFetcher>, FixedClock) {
        let clock = FixedClock::new(utc(2024, 1, 1));
        let cache = FeedCache::new(Duration::from_secs(300), Arc::new(clock.clone()));
        (FeedIngestor::new(fetcher, cache, DisplayZone::new(chrono_tz::UTC), Duration::from_secs(5)), clock)
    }

    fn subscription() -> Subscription {
        Subscription::new("s1".into(), "https://example.com/team.ics".parse().unwrap(), "Team".into(), "work".into(), "alice".into())
            .with_color("teal".into())
    }

    #[tokio::test]
    async fn normalize_expands_and_tags_events() {
        let fetcher = MockFeedFetcher::new();
        fetcher.serve("https://example.com/team.ics", WEEKLY_FEED);
        let (ingestor, _clock) = ingestor(fetcher);

        let events = ingestor.events_for(&subscription(), utc(2024, 1, 1), utc(2024, 1, 15)).await;
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![
            "standup-1704070800",
            "standup-1704675600",
            "party",
            "weird",
        ]);
        assert!(events.iter().all(|e| e.completable == false && e.completed == false));
        assert!(events.iter().all(|e| e.subscription.as_ref().map(|s| s.color.as_str()) == Some("#008080")));
        assert_eq!(events[0].end, Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 15, 0).unwrap()));
        assert_eq!(events[1].instance_date.as_deref(), Some("2024-01-08"));
    }

    #[tokio::test]
    async fn feeds_are_cached_between_queries() {
        let fetcher = MockFeedFetcher::new();
        fetcher.serve("https://example.com/team.ics", WEEKLY_FEED);
        let (ingestor, clock) = ingestor(fetcher);

        ingestor.events_for(&subscription(), utc(2024, 1, 1), utc(2024, 1, 15)).await;
        ingestor.events_for(&subscription(), utc(2024, 2, 1), utc(2024, 2, 15)).await;
        assert_eq!(ingestor.fetcher().n_fetches(), 1);

        clock.advance(chrono::Duration::minutes(5));
        ingestor.events_for(&subscription(), utc(2024, 1, 1), utc(2024, 1, 15)).await;
        assert_eq!(ingestor.fetcher().n_fetches(), 2);
    }

    #[tokio::test]
    async fn failing_subscription_yields_no_event() {
        let fetcher = MockFeedFetcher::new_with_behaviour(MockBehaviour::fail_now(2));
        fetcher.serve("https://example.com/team.ics", WEEKLY_FEED);
        let (ingestor, _clock) = ingestor(fetcher);

        assert!(ingestor.try_events_for(&subscription(), utc(2024, 1, 1), utc(2024, 1, 15)).await.is_err());
        assert!(ingestor.events_for(&subscription(), utc(2024, 1, 1), utc(2024, 1, 15)).await.is_empty());
        // Failures are not cached, the server is asked again next time
        assert_eq!(ingestor.events_for(&subscription(), utc(2024, 1, 1), utc(2024, 1, 15)).await.len(), 4);
    }

    #[tokio::test]
    async fn validation_reports_descriptive_errors() {
        let fetcher = MockFeedFetcher::new();
        fetcher.serve("https://example.com/team.ics", WEEKLY_FEED);
        fetcher.serve("https://example.com/page.html", "<html>nope</html>");
        let (ingestor, _clock) = ingestor(fetcher);

        let summary = ingestor.validate_subscription_url("webcal://example.com/team.ics").await;
        // webcal URLs are fetched over https
        let summary = summary.unwrap();
        assert_eq!(summary.name.as_deref(), Some("Team"));
        assert_eq!(summary.n_components, 3);

        let err = ingestor.validate_subscription_url("https://example.com/page.html").await.unwrap_err();
        assert!(err.to_string().contains("not a valid iCalendar feed"));
        let err = ingestor.validate_subscription_url("https://example.com/missing.ics").await.unwrap_err();
        assert_eq!(err, FeedError::HttpStatus(404));
        let err = ingestor.validate_subscription_url("ftp://example.com/team.ics").await.unwrap_err();
        assert!(matches!(err, FeedError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn slow_feeds_time_out() {
        let fetcher = MockFeedFetcher::new();
        fetcher.serve("https://example.com/team.ics", WEEKLY_FEED);
        fetcher.set_delay(Duration::from_millis(500));
        let clock = FixedClock::new(utc(2024, 1, 1));
        let cache = FeedCache::new(Duration::from_secs(300), Arc::new(clock));
        let ingestor = FeedIngestor::new(fetcher, cache, DisplayZone::new(chrono_tz::UTC), Duration::from_millis(50));

        let err = ingestor.try_events_for(&subscription(), utc(2024, 1, 1), utc(2024, 1, 15)).await.unwrap_err();
        assert!(matches!(err, FeedError::Timeout(_)));
    }
}
