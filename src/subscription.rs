//! External calendar subscriptions

use serde::{Deserialize, Serialize};
use url::Url;

/// Color given to subscriptions whose stored color cannot be parsed
pub const DEFAULT_COLOR: &str = "#3b82f6";

/// An externally hosted calendar feed a user subscribed to
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    id: String,
    feed_url: Url,
    name: String,
    space: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    owner: String,
}

fn default_enabled() -> bool {
    true
}

impl Subscription {
    pub fn new(id: String, feed_url: Url, name: String, space: String, owner: String) -> Self {
        Self {
            id, feed_url, name, space, owner,
            color: None,
            enabled: true,
        }
    }

    pub fn id(&self) -> &str      { &self.id       }
    pub fn feed_url(&self) -> &Url { &self.feed_url }
    pub fn name(&self) -> &str    { &self.name     }
    pub fn space(&self) -> &str   { &self.space    }
    pub fn owner(&self) -> &str   { &self.owner    }
    pub fn enabled(&self) -> bool { self.enabled   }

    /// The subscription color, normalized to a `#rrggbb` string
    pub fn color(&self) -> String {
        normalize_color(self.color.as_deref())
    }

    pub fn with_color(mut self, color: String) -> Self {
        self.color = Some(color);
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The identity that travels along with every event mirrored from this subscription
    pub fn link(&self) -> SubscriptionLink {
        SubscriptionLink {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color(),
        }
    }
}

/// Subscription data attached to a mirrored event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionLink {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// Turn any CSS color (`red`, `#f00`, `rgb(255, 0, 0)`...) into `#rrggbb`
pub fn normalize_color(color: Option<&str>) -> String {
    match color.map(csscolorparser::parse) {
        None => DEFAULT_COLOR.to_string(),
        Some(Ok(parsed)) => {
            let (r, g, b, _) = parsed.rgba_u8();
            format!("#{:02x}{:02x}{:02x}", r, g, b)
        },
        Some(Err(err)) => {
            log::warn!("Invalid subscription color {:?} ({}). Using the default one", color, err);
            DEFAULT_COLOR.to_string()
        },
    }
}
