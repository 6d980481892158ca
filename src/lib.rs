//! This crate provides the calendar engine of a personal task and habit manager.
//!
//! Given a space and a time window, a [`Provider`](provider::Provider) produces the unified agenda a user sees:
//! one-off and recurring tasks (expanded by the [`recurrence`] module), periodic habits, and events mirrored from
//! external iCal subscriptions (downloaded by the [`client`], kept in a [`cache`] and normalized by [`ingest`]).
//! A subscription that cannot be reached never breaks the rest of the agenda.
//!
//! In the other direction, the [`publish`] module renders a user's own items as a token-protected iCal feed
//! that any calendar app can subscribe to.
//!
//! Every "today", weekday or clock-time decision is made in a single display zone, see [`timezone`].
//! Storage is not handled by this crate: callers provide it through the traits of the [`traits`] module
//! (an in-memory implementation is available in [`store`]).

pub mod traits;

mod task;
pub use task::{Priority, Subtask, Task};
mod habit;
pub use habit::{Frequency, Habit};
pub mod subscription;
pub use subscription::Subscription;
pub mod event;
pub use event::{CalendarEvent, EventKind};
pub mod completion;
pub use completion::CompletionMap;

pub mod timezone;
pub mod recurrence;
pub mod ical;
pub mod client;
pub mod cache;
pub mod ingest;
pub mod provider;
pub use provider::{AggregationFlags, Provider};
pub mod publish;

pub mod clock;
pub mod config;
pub mod store;
pub mod mock_behaviour;
pub mod utils;
