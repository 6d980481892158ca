//! Utilities to track the progression of an aggregation

use std::fmt::{Display, Error, Formatter};

/// An event that happens during an aggregation
#[derive(Clone, Debug, PartialEq)]
pub enum AggregationEvent {
    /// Aggregation has not started
    NotStarted,
    /// Aggregation has just started but no source is handled yet
    Started,
    /// Aggregation is in progress.
    InProgress{ source: String, details: String },
    /// Aggregation is finished
    Finished{ n_events: usize, success: bool },
}

impl Display for AggregationEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            AggregationEvent::NotStarted => write!(f, "Not started"),
            AggregationEvent::Started => write!(f, "Aggregation has started..."),
            AggregationEvent::InProgress{source, details} => write!(f, "[{}] {}...", source, details),
            AggregationEvent::Finished{n_events, success} => match success {
                true => write!(f, "Aggregation finished with {} events", n_events),
                false => write!(f, "Aggregation finished with {} events, some sources failed", n_events),
            }
        }
    }
}

impl Default for AggregationEvent {
    fn default() -> Self {
        Self::NotStarted
    }
}



/// See [`feedback_channel`]
pub type FeedbackSender = tokio::sync::watch::Sender<AggregationEvent>;
/// See [`feedback_channel`]
pub type FeedbackReceiver = tokio::sync::watch::Receiver<AggregationEvent>;

/// Create a feeback channel, that can be used to retrieve the current progress of an aggregation
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    tokio::sync::watch::channel(AggregationEvent::default())
}



/// A subscription that could not contribute to an aggregation
#[derive(Clone, Debug, PartialEq)]
pub struct FailedSubscription {
    pub id: String,
    pub name: String,
    /// User-readable reason
    pub reason: String,
}

/// A structure that tracks the progression and the errors that happen during an aggregation
pub struct AggregationProgress {
    n_errors: u32,
    failed_subscriptions: Vec<FailedSubscription>,
    feedback_channel: Option<FeedbackSender>,
}
impl AggregationProgress {
    pub fn new() -> Self {
        Self { n_errors: 0, failed_subscriptions: Vec::new(), feedback_channel: None }
    }
    pub fn new_with_feedback_channel(channel: FeedbackSender) -> Self {
        Self { n_errors: 0, failed_subscriptions: Vec::new(), feedback_channel: Some(channel) }
    }


    pub fn is_success(&self) -> bool {
        self.n_errors == 0
    }

    pub fn n_errors(&self) -> u32 {
        self.n_errors
    }

    /// Log that a subscription failed, and remember it
    pub fn subscription_failed(&mut self, failure: FailedSubscription) {
        self.warn(&format!("Subscription {} ({}) is skipped this time: {}", failure.name, failure.id, failure.reason));
        self.failed_subscriptions.push(failure);
    }

    pub fn failed_subscriptions(&self) -> &[FailedSubscription] {
        &self.failed_subscriptions
    }

    pub fn into_failed_subscriptions(self) -> Vec<FailedSubscription> {
        self.failed_subscriptions
    }

    /// Log an error
    pub fn error(&mut self, text: &str) {
        log::error!("{}", text);
        self.n_errors += 1;
    }
    /// Log a warning
    pub fn warn(&mut self, text: &str) {
        log::warn!("{}", text);
        self.n_errors += 1;
    }
    /// Log an info
    pub fn info(&mut self, text: &str) {
        log::info!("{}", text);
    }
    /// Log a debug message
    pub fn debug(&mut self, text: &str) {
        log::debug!("{}", text);
    }
    /// Log a trace message
    pub fn trace(&mut self, text: &str) {
        log::trace!("{}", text);
    }
    /// Send an event as a feedback to the listener (if any).
    pub fn feedback(&mut self, event: AggregationEvent) {
        if let Some(sender) = self.feedback_channel.as_ref() {
            // Nobody listening is not an error
            let _ = sender.send(event);
        }
    }
}

impl Default for AggregationProgress {
    fn default() -> Self {
        Self::new()
    }
}
