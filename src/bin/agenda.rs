//! Prints the agenda of a space, or the outbound feed of a user, from a JSON store
//!
//! ```text
//! habitcal-agenda agenda <store.json> <space> [days] [settings.json]
//! habitcal-agenda feed <store.json> <user> [settings.json]
//! ```

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;

use habitcal::client::Client;
use habitcal::clock::SystemClock;
use habitcal::config::Settings;
use habitcal::publish::FeedPublisher;
use habitcal::store::MemoryStore;
use habitcal::traits::Clock;
use habitcal::{AggregationFlags, Provider};

const USAGE: &str = "Usage:
    habitcal-agenda agenda <store.json> <space> [days] [settings.json]
    habitcal-agenda feed <store.json> <user> [settings.json]";


#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(err) = run(&args).await {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    match args.first().map(String::as_str) {
        Some("agenda") if args.len() >= 3 => {
            let days: i64 = match args.get(3) {
                None => 7,
                Some(days) => days.parse().map_err(|err| format!("Invalid number of days {:?}: {}", days, err))?,
            };
            let settings = load_settings(args.get(4))?;
            print_agenda(Path::new(&args[1]), &args[2], days, &settings).await
        },
        Some("feed") if args.len() >= 3 => {
            let settings = load_settings(args.get(3))?;
            print_feed(Path::new(&args[1]), &args[2], &settings).await
        },
        _ => Err(USAGE.into()),
    }
}

fn load_settings(path: Option<&String>) -> Result<Settings, Box<dyn Error>> {
    match path {
        None => Ok(Settings::default()),
        Some(path) => Settings::from_file(Path::new(path)),
    }
}

async fn print_agenda(store_path: &Path, space: &str, days: i64, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::from_file(store_path)?;
    let client = Client::new(settings.fetch_timeout())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = Provider::new(store, client, settings, Arc::clone(&clock))?;

    let zone = *provider.zone();
    let today = zone.date_of(clock.now());
    let window_start = zone.start_of_day(today).ok_or("Unable to find the start of today")?;
    let window_end = window_start + Duration::days(days) - Duration::milliseconds(1);

    let flags = AggregationFlags::INCLUDE_OVERDUE | AggregationFlags::INCLUDE_NO_DUE_DATE;
    let report = provider.aggregate_with_report(space, window_start, window_end, flags).await?;

    println!("---- {} from {} ({} days) -----", space, today, days);
    habitcal::utils::print_events(&report.events, &zone);
    if report.failed_subscriptions.is_empty() == false {
        println!("---- unavailable subscriptions -----");
        habitcal::utils::print_failures(&report.failed_subscriptions);
    }
    Ok(())
}

async fn print_feed(store_path: &Path, user_id: &str, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::from_file(store_path)?;
    let publisher = FeedPublisher::new(store, settings, Arc::new(SystemClock))?;

    let link = publisher.feed_url(user_id)?;
    log::info!("Feed of {} is published at {}", user_id, link.url);
    let token = publisher.token_for(user_id);
    print!("{}", publisher.render_feed(user_id, &token).await?);
    Ok(())
}
