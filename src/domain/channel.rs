use serde::{Deserialize, Serialize, Serializer};

use crate::domain::Item;

pub const NOTIFICATIONS_CHANNEL: &str = "notifications";

/// Unread indicator; serialized as a bare bool or number, omitted when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unread {
    #[default]
    Unknown,
    Read(bool),
    Count(i64),
}

impl Unread {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Unread::Unknown)
    }
}

impl Serialize for Unread {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Unread::Unknown => serializer.serialize_none(),
            Unread::Read(b) => serializer.serialize_bool(*b),
            Unread::Count(n) => serializer.serialize_i64(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub uid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Unread::is_unknown")]
    pub unread: Unread,
}

impl Channel {
    pub fn new(uid: &str, name: &str) -> Self {
        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            unread: Unread::Unknown,
        }
    }
}

/// Per-channel storage and routing rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSetting {
    /// Timeline backend name; empty selects the configured default.
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub include_regex: String,
    #[serde(default)]
    pub exclude_regex: String,
    #[serde(default)]
    pub exclude_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub items: Vec<Item>,
    pub paging: Pagination,
}
