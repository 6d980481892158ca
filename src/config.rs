//! Support for library configuration options

use std::error::Error;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;

/// Part of the ProdID string that describes the organization (example of a ProdID string: `-//ABC Corporation//My Product//EN`).
/// Feel free to override it when initing this library.
pub static ORG_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("My organization".to_string())));

/// Part of the ProdID string that describes the product name (example of a ProdID string: `-//ABC Corporation//My Product//EN`).
/// Feel free to override it when initing this library.
pub static PRODUCT_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("HabitCal".to_string())));

/// Largest value accepted for [`Settings::upcoming_days`] and [`Settings::overdue_lookback_days`]
pub const MAX_PASS_DAYS: i64 = 3650;

/// Runtime settings of the calendar engine.
///
/// Every field has a default, so that a settings file only needs to mention the values it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// IANA name of the single zone used for every "today", weekday and clock-time decision.
    ///
    /// In a zone with daylight saving time, a wall-clock time of the autumn fold is resolved to its earlier instant.
    pub display_timezone: String,
    /// How long a fetched external feed is served from the cache
    pub feed_ttl_secs: u64,
    /// Timeout of a single external feed request
    pub fetch_timeout_secs: u64,
    /// How many external feeds may be fetched at the same time during one aggregation
    pub max_concurrent_fetches: usize,
    /// How far beyond the primary window the "upcoming" pass looks
    pub upcoming_days: i64,
    /// How far before "now" the "overdue" pass looks for unfinished recurring instances
    pub overdue_lookback_days: i64,
    /// Secret mixed into the outbound feed tokens
    pub server_secret: String,
    /// Public URL the outbound feed links are built upon
    pub public_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_timezone: "Asia/Shanghai".to_string(),
            feed_ttl_secs: 300,
            fetch_timeout_secs: 10,
            max_concurrent_fetches: 4,
            upcoming_days: 14,
            overdue_lookback_days: 90,
            server_secret: String::new(),
            public_base_url: "http://localhost:3000/".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error>> {
        let settings: Self = match std::fs::File::open(path) {
            Err(err) => {
                return Err(format!("Unable to open file {:?}: {}", path, err).into());
            },
            Ok(file) => serde_json::from_reader(file)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check the values that cannot be checked by serde alone
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        self.timezone()?;
        self.public_base_url()?;
        if self.max_concurrent_fetches == 0 {
            return Err("max_concurrent_fetches must be at least 1".into());
        }
        if (0..=MAX_PASS_DAYS).contains(&self.upcoming_days) == false {
            return Err(format!("upcoming_days must be between 0 and {}, got {}", MAX_PASS_DAYS, self.upcoming_days).into());
        }
        if (0..=MAX_PASS_DAYS).contains(&self.overdue_lookback_days) == false {
            return Err(format!("overdue_lookback_days must be between 0 and {}, got {}", MAX_PASS_DAYS, self.overdue_lookback_days).into());
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, Box<dyn Error>> {
        Tz::from_str(&self.display_timezone)
            .map_err(|err| format!("Invalid display timezone {:?}: {}", self.display_timezone, err).into())
    }

    pub fn public_base_url(&self) -> Result<Url, Box<dyn Error>> {
        Ok(Url::parse(&self.public_base_url)?)
    }

    pub fn feed_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{ "feed_ttl_secs": 60, "server_secret": "s3cr3t" }"#).unwrap();
        assert_eq!(settings.feed_ttl(), Duration::from_secs(60));
        assert_eq!(settings.server_secret, "s3cr3t");
        assert_eq!(settings.display_timezone, "Asia/Shanghai");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        let settings = Settings {
            display_timezone: "Mars/Olympus_Mons".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn pass_lengths_are_bounded() {
        let settings: Settings = serde_json::from_str(r#"{ "upcoming_days": 9223372036854775 }"#).unwrap();
        assert!(settings.validate().is_err());

        let settings: Settings = serde_json::from_str(r#"{ "overdue_lookback_days": -1 }"#).unwrap();
        assert!(settings.validate().is_err());

        let settings: Settings = serde_json::from_str(r#"{ "upcoming_days": 3650, "overdue_lookback_days": 0 }"#).unwrap();
        assert!(settings.validate().is_ok());
    }
}
