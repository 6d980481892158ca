//! This module provides a client to download external calendar feeds

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::traits::FeedFetcher;


/// Why an external feed could not be used.
///
/// These messages are shown to users when they add or edit a subscription, so that they can fix the URL.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    #[error("invalid feed URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported URL scheme {0:?}, only http, https and webcal are allowed")]
    UnsupportedScheme(String),
    #[error("the calendar server could not be reached: {0}")]
    Unreachable(String),
    #[error("the calendar server did not answer within {0} seconds")]
    Timeout(u64),
    #[error("the calendar server answered with HTTP status {0}")]
    HttpStatus(u16),
    #[error("the document is not a valid iCalendar feed: {0}")]
    Unparsable(String),
}


/// Check that a subscription URL can be fetched, and return the URL that should actually be requested.
///
/// `webcal://` and `webcals://` URLs are fetched over HTTPS.
pub fn normalize_feed_url(url: &Url) -> Result<Url, FeedError> {
    match url.scheme() {
        "http" | "https" => Ok(url.clone()),
        "webcal" | "webcals" => {
            let rest = &url.as_str()[url.scheme().len()..];
            Url::parse(&format!("https{}", rest)).map_err(|err| FeedError::InvalidUrl(err.to_string()))
        },
        other => Err(FeedError::UnsupportedScheme(other.to_string())),
    }
}

/// Parse and check a user-provided subscription URL
pub fn parse_feed_url(raw: &str) -> Result<Url, FeedError> {
    let url = Url::parse(raw.trim()).map_err(|err| FeedError::InvalidUrl(err.to_string()))?;
    normalize_feed_url(&url)?;
    Ok(url)
}


/// A [`FeedFetcher`] that downloads feeds over HTTP
pub struct Client {
    http: reqwest::Client,
    timeout: Duration,
}

impl Client {
    /// Create a client. This does not start a connection
    pub fn new(timeout: Duration) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| FeedError::Unreachable(err.to_string()))?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl FeedFetcher for Client {
    async fn fetch(&self, url: &Url) -> Result<String, FeedError> {
        let target = normalize_feed_url(url)?;
        log::debug!("Fetching feed {}", target);

        let response = self.http
            .get(target.clone())
            .header(reqwest::header::ACCEPT, "text/calendar, */*;q=0.5")
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        if response.status().is_success() == false {
            return Err(FeedError::HttpStatus(response.status().as_u16()));
        }

        response.text().await.map_err(|err| self.request_error(err))
    }
}

impl Client {
    fn request_error(&self, err: reqwest::Error) -> FeedError {
        if err.is_timeout() {
            FeedError::Timeout(self.timeout.as_secs())
        } else {
            FeedError::Unreachable(err.to_string())
        }
    }
}
