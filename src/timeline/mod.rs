//! Per-channel timelines.
//!
//! Every channel stores its posts through one [`TimelineBackend`], picked by
//! name from the channel's settings when the channel is set up.

pub mod null;
pub mod sorted_set;
pub mod sqlite;
pub mod stream;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use crate::app::{Result, TributaryError};
use crate::domain::{ChannelSetting, Item, Pagination, Timeline, Unread};
use crate::keyspace::Keyspace;
use crate::store::SqliteStore;

pub use null::NullTimeline;
pub use sorted_set::SortedSetTimeline;
pub use sqlite::SqliteTimeline;
pub use stream::StreamTimeline;

pub const PAGE_SIZE: usize = 20;

pub trait TimelineBackend: Send + Sync {
    /// One page, newest first. `after` pages towards older posts, `before`
    /// towards newer ones.
    fn items(&self, before: Option<&str>, after: Option<&str>) -> Result<Timeline>;

    fn count(&self) -> Result<i64>;

    /// Idempotent upsert by item id. Returns true only when the post became
    /// visible because of this call.
    fn add_item(&self, item: &Item) -> Result<bool>;

    /// Unknown ids are ignored.
    fn mark_read(&self, ids: &[String]) -> Result<()>;

    fn unread(&self) -> Result<Unread> {
        Ok(Unread::Count(self.count()?))
    }

    /// Drop everything stored for the channel.
    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    SortedSet,
    Stream,
    Sqlite,
    Null,
}

impl FromStr for BackendKind {
    type Err = TributaryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sorted-set" => Ok(BackendKind::SortedSet),
            "stream" => Ok(BackendKind::Stream),
            "sqlite" => Ok(BackendKind::Sqlite),
            "null" => Ok(BackendKind::Null),
            other => Err(TributaryError::Config(format!(
                "unknown timeline backend '{}'",
                other
            ))),
        }
    }
}

/// Opens timelines over the shared storage handles.
#[derive(Clone)]
pub struct Timelines {
    keyspace: Arc<Keyspace>,
    store: Arc<SqliteStore>,
    default_backend: BackendKind,
}

impl Timelines {
    pub fn new(keyspace: Arc<Keyspace>, store: Arc<SqliteStore>, default_backend: &str) -> Result<Self> {
        Ok(Self {
            keyspace,
            store,
            default_backend: default_backend.parse()?,
        })
    }

    /// Backend selected by a channel setting; empty means the default.
    pub fn kind_for(&self, setting: &ChannelSetting) -> Result<BackendKind> {
        if setting.backend.is_empty() {
            Ok(self.default_backend)
        } else {
            setting.backend.parse()
        }
    }

    pub fn open(&self, channel_uid: &str, setting: &ChannelSetting) -> Result<Arc<dyn TimelineBackend>> {
        let timeline: Arc<dyn TimelineBackend> = match self.kind_for(setting)? {
            BackendKind::SortedSet => Arc::new(SortedSetTimeline::new(self.keyspace.clone(), channel_uid)),
            BackendKind::Stream => Arc::new(StreamTimeline::new(self.keyspace.clone(), channel_uid)),
            BackendKind::Sqlite => Arc::new(SqliteTimeline::new(self.store.clone(), channel_uid)),
            BackendKind::Null => Arc::new(NullTimeline),
        };
        Ok(timeline)
    }
}

/// Page boundary: the sort score plus the member that breaks ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub score: i64,
    pub key: String,
}

impl Cursor {
    pub fn new(score: i64, key: &str) -> Self {
        Self {
            score,
            key: key.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.score, self.key)
    }

    pub fn decode(s: &str) -> Result<Self> {
        s.split_once(':')
            .and_then(|(score, key)| Some(Self::new(score.parse().ok()?, key)))
            .filter(|c| !c.key.is_empty())
            .ok_or_else(|| TributaryError::BadRequest(format!("invalid cursor '{}'", s)))
    }
}

/// Pagination for a page whose first and last entries are known.
pub fn paging(first: Option<String>, last: Option<String>) -> Pagination {
    Pagination {
        before: first,
        after: last,
    }
}

/// Sort score of a post: its publish time as epoch seconds.
pub fn published_score(item: &Item) -> Result<i64> {
    parse_published(&item.published)
        .map(|dt| dt.timestamp())
        .ok_or_else(|| {
            TributaryError::TimeParse(format!("'{}' on item {}", item.published, item.id))
        })
}

/// RFC 3339, or a date or local time without an offset, taken as UTC.
fn parse_published(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s).or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z")) {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))?;
    Some(naive.and_utc().fixed_offset())
}
