//! This modules merges every source of calendar items in a single agenda
//!
//! A [`Provider`] combines the tasks and habits of the storage collaborator with the events of the external subscriptions,
//! for a given space and time window.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;

use bitflags::bitflags;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::cache::FeedCache;
use crate::completion::CompletionMap;
use crate::config::Settings;
use crate::event::{CalendarEvent, EventKind};
use crate::ingest::FeedIngestor;
use crate::recurrence::Expander;
use crate::subscription::Subscription;
use crate::timezone::{format_instance_date, DisplayZone};
use crate::traits::{Clock, CompletionSource, EntityStore, FeedFetcher};
use crate::Habit;
use crate::Task;

pub mod progress;
use progress::{AggregationEvent, AggregationProgress, FailedSubscription, FeedbackSender};

bitflags! {
    /// The optional passes of an aggregation
    #[derive(Default, Serialize, Deserialize)]
    pub struct AggregationFlags: u8 {
        /// Unfinished task instances due before now, whatever the window
        const INCLUDE_OVERDUE = 1;
        /// Unfinished task instances due shortly after the window
        const INCLUDE_UPCOMING = 2;
        /// Tasks that have no due date at all
        const INCLUDE_NO_DUE_DATE = 4;
    }
}

/// The result of an aggregation, along with the sources that could not be used
#[derive(Clone, Debug)]
pub struct AggregationReport {
    pub events: Vec<CalendarEvent>,
    pub failed_subscriptions: Vec<FailedSubscription>,
}


/// A data source that merges tasks, habits and external subscriptions.
///
/// `S` is the storage collaborator, `F` the transport used to download external feeds
/// (usually a [`Client`](crate::client::Client)).
pub struct Provider<S, F>
where
    S: EntityStore + CompletionSource + Send + Sync,
    F: FeedFetcher + Send + Sync,
{
    store: S,
    ingestor: FeedIngestor<F>,
    expander: Expander,
    clock: Arc<dyn Clock>,

    max_concurrent_fetches: usize,
    upcoming_horizon: Duration,
    overdue_lookback: Duration,
}

impl<S, F> Provider<S, F>
where
    S: EntityStore + CompletionSource + Send + Sync,
    F: FeedFetcher + Send + Sync,
{
    /// Create a provider.
    ///
    /// This builds the feed cache too, so that every aggregation made by this provider shares it.
    pub fn new(store: S, fetcher: F, settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self, Box<dyn Error>> {
        settings.validate()?;
        let zone = DisplayZone::new(settings.timezone()?);
        let cache = FeedCache::new(settings.feed_ttl(), Arc::clone(&clock));
        let ingestor = FeedIngestor::new(fetcher, cache, zone, settings.fetch_timeout());

        Ok(Self {
            store,
            ingestor,
            expander: Expander::new(zone),
            clock,
            max_concurrent_fetches: settings.max_concurrent_fetches.max(1),
            upcoming_horizon: Duration::days(settings.upcoming_days),
            overdue_lookback: Duration::days(settings.overdue_lookback_days),
        })
    }

    /// Returns the storage collaborator
    pub fn store(&self) -> &S { &self.store }
    /// Returns the ingestion component, e.g. to validate a subscription URL
    pub fn ingestor(&self) -> &FeedIngestor<F> { &self.ingestor }
    pub fn zone(&self) -> &DisplayZone { self.expander.zone() }

    /// The agenda of a space for `[window_start, window_end]`.
    ///
    /// Failing subscriptions are logged and skipped. Only a failure of the storage collaborator is an error.
    pub async fn aggregate(&self, space: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>, flags: AggregationFlags) -> Result<Vec<CalendarEvent>, Box<dyn Error>> {
        let mut progress = AggregationProgress::new();
        self.run_aggregation(space, window_start, window_end, flags, &mut progress).await
    }

    /// Same as [`Self::aggregate`], but also tells which subscriptions could not be used
    pub async fn aggregate_with_report(&self, space: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>, flags: AggregationFlags) -> Result<AggregationReport, Box<dyn Error>> {
        let mut progress = AggregationProgress::new();
        let events = self.run_aggregation(space, window_start, window_end, flags, &mut progress).await?;
        Ok(AggregationReport {
            events,
            failed_subscriptions: progress.into_failed_subscriptions(),
        })
    }

    /// Same as [`Self::aggregate`], and provide feeedback to the caller about the progress.
    pub async fn aggregate_with_feedback(&self, space: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>, flags: AggregationFlags, feedback_sender: FeedbackSender) -> Result<Vec<CalendarEvent>, Box<dyn Error>> {
        let mut progress = AggregationProgress::new_with_feedback_channel(feedback_sender);
        self.run_aggregation(space, window_start, window_end, flags, &mut progress).await
    }

    async fn run_aggregation(&self, space: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>, flags: AggregationFlags, progress: &mut AggregationProgress) -> Result<Vec<CalendarEvent>, Box<dyn Error>> {
        progress.info(&format!("Aggregating space {} from {} to {}", space, window_start, window_end));
        progress.feedback(AggregationEvent::Started);
        self.ingestor.cache().purge_expired();

        if window_end < window_start {
            progress.warn(&format!("Empty window ({} is after {})", window_start, window_end));
            progress.feedback(AggregationEvent::Finished{ n_events: 0, success: false });
            return Ok(Vec::new());
        }

        let tasks = self.store.tasks_in_space(space).await?;
        let habits = self.store.habits_in_space(space).await?;
        let subscriptions = self.store.subscriptions_in_space(space).await?;
        let entity_ids: Vec<String> = tasks.iter().map(|t| t.id().to_string())
            .chain(habits.iter().map(|h| h.id().to_string()))
            .collect();
        let completions = self.store.completions_for(&entity_ids).await?;
        progress.debug(&format!("{} tasks, {} habits and {} subscriptions in space {}", tasks.len(), habits.len(), subscriptions.len(), space));

        let mut events = self.expander.expand(&tasks, window_start, window_end, &completions);
        progress.feedback(AggregationEvent::InProgress{ source: "tasks".to_string(), details: format!("{} instances", events.len()) });

        let habit_events = self.habit_events(&habits, window_start, window_end, &completions);
        progress.feedback(AggregationEvent::InProgress{ source: "habits".to_string(), details: format!("{} instances", habit_events.len()) });
        events.extend(habit_events);

        events.extend(self.external_events(space, &subscriptions, window_start, window_end, progress).await);

        if flags.contains(AggregationFlags::INCLUDE_OVERDUE) {
            events.extend(self.overdue_events(&tasks, &completions));
        }
        if flags.contains(AggregationFlags::INCLUDE_UPCOMING) {
            events.extend(self.upcoming_events(&tasks, window_end, &completions));
        }
        if flags.contains(AggregationFlags::INCLUDE_NO_DUE_DATE) {
            events.extend(unscheduled_events(&tasks));
        }

        let events = sorted(deduplicated(events));
        progress.info(&format!("Aggregation of space {} produced {} events", space, events.len()));
        progress.feedback(AggregationEvent::Finished{ n_events: events.len(), success: progress.is_success() });
        Ok(events)
    }

    /// One event per day a habit is expected on
    fn habit_events(&self, habits: &[Habit], window_start: DateTime<Utc>, window_end: DateTime<Utc>, completions: &CompletionMap) -> Vec<CalendarEvent> {
        let zone = self.expander.zone();
        let last_day = zone.date_of(window_end);

        let mut events = Vec::new();
        for habit in habits.iter().filter(|h| h.active()) {
            let mut day = zone.date_of(window_start).max(zone.date_of(*habit.created_at()));
            while day <= last_day {
                if habit.frequency().matches_weekday(weekday_from_sunday(day)) {
                    match self.habit_event(habit, day, completions) {
                        Some(event) => events.push(event),
                        None => log::warn!("Unable to place habit {} on {}", habit.id(), day),
                    }
                }
                day = match day.succ_opt() {
                    Some(next) => next,
                    None => break,
                };
            }
        }
        events
    }

    fn habit_event(&self, habit: &Habit, day: NaiveDate, completions: &CompletionMap) -> Option<CalendarEvent> {
        let zone = self.expander.zone();
        let (due, all_day) = match habit.reminder_time() {
            Some(time) => (zone.resolve_local(day.and_time(time))?, false),
            None => (zone.start_of_day(day)?, true),
        };
        let instance_date = format_instance_date(day);

        let mut event = CalendarEvent::new(habit.id().to_string(), habit.name().to_string(), EventKind::Habit);
        event.due = Some(due);
        event.all_day = all_day;
        event.completed = completions.is_completed(habit.id(), &instance_date);
        event.instance_date = Some(instance_date);
        event.recurring = true;
        Some(event)
    }

    /// Events of every enabled subscription of the space, fetched with bounded concurrency
    async fn external_events(&self, space: &str, subscriptions: &[Subscription], window_start: DateTime<Utc>, window_end: DateTime<Utc>, progress: &mut AggregationProgress) -> Vec<CalendarEvent> {
        let enabled: Vec<&Subscription> = subscriptions.iter()
            .filter(|s| s.enabled() && s.space() == space)
            .collect();

        let results: Vec<_> = stream::iter(enabled)
            .map(|subscription| async move {
                let result = self.ingestor.try_events_for(subscription, window_start, window_end).await;
                (subscription, result)
            })
            .buffered(self.max_concurrent_fetches)
            .collect()
            .await;

        let mut events = Vec::new();
        for (subscription, result) in results {
            match result {
                Ok(sub_events) => {
                    progress.feedback(AggregationEvent::InProgress{
                        source: subscription.name().to_string(),
                        details: format!("{} events", sub_events.len()),
                    });
                    events.extend(sub_events);
                },
                Err(err) => {
                    progress.subscription_failed(FailedSubscription {
                        id: subscription.id().to_string(),
                        name: subscription.name().to_string(),
                        reason: err.to_string(),
                    });
                },
            }
        }
        events
    }

    /// Unfinished instances due before now.
    ///
    /// One-off tasks are looked up without lower bound, recurring ones only within the lookback period.
    fn overdue_events(&self, tasks: &[Task], completions: &CompletionMap) -> Vec<CalendarEvent> {
        let now = self.clock.now();
        let (recurring, one_off): (Vec<Task>, Vec<Task>) = tasks.iter().cloned().partition(|t| t.is_recurring());

        let mut events = self.expander.expand(&one_off, DateTime::<Utc>::MIN_UTC, now, completions);
        match now.checked_sub_signed(self.overdue_lookback) {
            Some(lookback_start) => events.extend(self.expander.expand(&recurring, lookback_start, now, completions)),
            None => log::warn!("The overdue lookback goes past the earliest representable date, skipping recurring tasks"),
        }
        events.retain(|e| e.completed == false && e.due.map(|due| due < now).unwrap_or(false));
        log::debug!("{} overdue instances", events.len());
        events
    }

    /// Unfinished instances due in `(window_end, window_end + horizon]`
    fn upcoming_events(&self, tasks: &[Task], window_end: DateTime<Utc>, completions: &CompletionMap) -> Vec<CalendarEvent> {
        let horizon_end = match window_end.checked_add_signed(self.upcoming_horizon) {
            Some(end) => end,
            None => {
                log::warn!("The upcoming horizon after {} is out of range", window_end);
                return Vec::new();
            },
        };
        let mut events = self.expander.expand(tasks, window_end, horizon_end, completions);
        events.retain(|e| e.completed == false && e.due.map(|due| due > window_end && due <= horizon_end).unwrap_or(false));
        log::debug!("{} upcoming instances", events.len());
        events
    }
}

/// Unfinished one-off tasks that have no due date
fn unscheduled_events(tasks: &[Task]) -> Vec<CalendarEvent> {
    tasks.iter()
        .filter(|t| t.is_recurring() == false && t.due_date().is_none() && t.completed() == false)
        .map(|task| {
            let mut event = CalendarEvent::new(task.id().to_string(), task.title().to_string(), EventKind::Task);
            event.priority = task.priority();
            event.labels = task.labels().to_vec();
            event.subtasks = task.subtasks().to_vec();
            event.description = task.description().map(String::from);
            event
        })
        .collect()
}

/// 0 = Sunday, as in habit target days
fn weekday_from_sunday(day: NaiveDate) -> u32 {
    use chrono::Datelike;
    day.weekday().num_days_from_sunday()
}

/// Keep the first event of every instance key
fn deduplicated(events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
    let mut seen = HashSet::new();
    events.into_iter()
        .filter(|event| {
            let (kind, id, date) = event.instance_key();
            seen.insert((kind, id.to_string(), date.map(String::from)))
        })
        .collect()
}

/// Ascending by due instant, unscheduled items last. The sort is stable.
fn sorted(mut events: Vec<CalendarEvent>) -> Vec<CalendarEvent> {
    events.sort_by(|a, b| match (a.due, b.due) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    events
}
