use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Card;

/// A followed source attached to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub channel_uid: String,
    pub kind: String,
    pub url: String,
    pub name: Option<String>,
    pub photo: Option<String>,
    pub hub: Option<String>,
    pub callback: Option<String>,
    pub secret: Option<String>,
    pub lease_seconds: Option<i64>,
    pub resubscribe_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// WebSub lifecycle of a feed, derived from its stored fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Unsubscribed,
    HubDiscovered,
    SubscriptionRequested,
    Active,
}

impl Feed {
    pub fn new(channel_uid: &str, url: String) -> Self {
        Self {
            id: 0,
            channel_uid: channel_uid.to_string(),
            kind: "feed".to_string(),
            url,
            name: None,
            photo: None,
            hub: None,
            callback: None,
            secret: None,
            lease_seconds: None,
            resubscribe_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    pub fn push_state(&self) -> PushState {
        match (&self.hub, &self.secret, self.lease_seconds) {
            (None, _, _) => PushState::Unsubscribed,
            (Some(_), None, _) => PushState::HubDiscovered,
            (Some(_), Some(_), None) => PushState::SubscriptionRequested,
            (Some(_), Some(_), Some(_)) => PushState::Active,
        }
    }

    /// Whether the WebSub lease is due for renewal at `now`.
    pub fn needs_resubscribe(&self, now: DateTime<Utc>) -> bool {
        self.hub.is_some() && self.resubscribe_at.is_some_and(|at| at <= now)
    }
}

/// Partial update of a feed record; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub name: Option<String>,
    pub photo: Option<String>,
    pub hub: Option<String>,
    pub callback: Option<String>,
    pub secret: Option<String>,
    pub lease_seconds: Option<i64>,
    pub resubscribe_at: Option<DateTime<Utc>>,
}

/// Identity of a source without its posts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub photo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Card>,
}

impl FeedSummary {
    pub fn new(url: &str) -> Self {
        Self {
            kind: "feed".to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }
}
