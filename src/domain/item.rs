use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::Card;

/// Rendered content of a post; `text` and `html` describe the same body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub html: String,
}

/// Identity of the feed an item arrived through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub photo: String,
}

/// Canonical post, serialized in jf2 shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub published: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Card>,
    #[serde(rename = "in-reply-to", default, skip_serializing_if = "Vec::is_empty")]
    pub in_reply_to: Vec<String>,
    #[serde(rename = "like-of", default, skip_serializing_if = "Vec::is_empty")]
    pub like_of: Vec<String>,
    #[serde(rename = "repost-of", default, skip_serializing_if = "Vec::is_empty")]
    pub repost_of: Vec<String>,
    #[serde(rename = "bookmark-of", default, skip_serializing_if = "Vec::is_empty")]
    pub bookmark_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin: Option<Card>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub refs: BTreeMap<String, Item>,
    #[serde(rename = "_is_read", default)]
    pub read: bool,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

fn default_kind() -> String {
    "entry".to_string()
}

impl Item {
    pub fn new(uid: &str) -> Self {
        Self {
            kind: default_kind(),
            uid: uid.to_string(),
            id: Self::generate_id(uid),
            ..Default::default()
        }
    }

    /// Deterministic storage key: hex SHA-256 of the identity string.
    pub fn generate_id(identity: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(identity.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute `id` from `uid`, falling back to `url`.
    pub fn assign_id(&mut self) {
        let identity = if self.uid.is_empty() { &self.url } else { &self.uid };
        self.id = Self::generate_id(identity);
    }

    /// Collapse an author with no populated fields into `None`.
    pub fn normalize_author(&mut self) {
        if self.author.as_ref().is_some_and(Card::is_empty) {
            self.author = None;
        }
        for r in self.refs.values_mut() {
            r.normalize_author();
        }
    }

    /// Post type used by per-channel exclusion rules.
    pub fn post_kind(&self) -> &'static str {
        if !self.repost_of.is_empty() {
            "repost"
        } else if !self.like_of.is_empty() {
            "like"
        } else if !self.bookmark_of.is_empty() {
            "bookmark"
        } else if !self.in_reply_to.is_empty() {
            "reply"
        } else if self.checkin.is_some() {
            "checkin"
        } else {
            "note"
        }
    }

    /// Name and content text joined, for regex rules and search.
    pub fn match_text(&self) -> String {
        let mut text = String::new();
        if let Some(name) = &self.name {
            text.push_str(name);
        }
        if let Some(content) = &self.content {
            text.push(' ');
            if content.text.is_empty() {
                text.push_str(&content.html);
            } else {
                text.push_str(&content.text);
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation_deterministic() {
        let id1 = Item::generate_id("https://example.com/post/1");
        let id2 = Item::generate_id("https://example.com/post/1");
        assert_eq!(id1, id2);
        assert_ne!(id1, Item::generate_id("https://example.com/post/2"));
    }

    #[test]
    fn test_id_is_hex_sha256() {
        let id = Item::generate_id("abc");
        assert_eq!(id.len(), 64);
        assert_eq!(
            id,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_assign_id_falls_back_to_url() {
        let mut item = Item {
            url: "https://example.com/a".into(),
            ..Default::default()
        };
        item.assign_id();
        assert_eq!(item.id, Item::generate_id("https://example.com/a"));

        item.uid = "tag:example.com,2024:a".into();
        item.assign_id();
        assert_eq!(item.id, Item::generate_id("tag:example.com,2024:a"));
    }

    #[test]
    fn test_empty_author_collapses() {
        let mut item = Item::new("x");
        item.author = Some(Card::default());
        item.normalize_author();
        assert!(item.author.is_none());

        item.author = Some(Card {
            name: "Alice".into(),
            ..Default::default()
        });
        item.normalize_author();
        assert!(item.author.is_some());
    }

    #[test]
    fn test_post_kind() {
        let mut item = Item::new("x");
        assert_eq!(item.post_kind(), "note");
        item.in_reply_to.push("https://a.example/".into());
        assert_eq!(item.post_kind(), "reply");
        item.like_of.push("https://b.example/".into());
        assert_eq!(item.post_kind(), "like");
    }

    #[test]
    fn test_serializes_jf2_names() {
        let mut item = Item::new("abc");
        item.like_of.push("https://example.com/".into());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "entry");
        assert_eq!(json["_id"], item.id);
        assert_eq!(json["_is_read"], false);
        assert!(json["like-of"].is_array());
        assert!(json.get("author").is_none());
    }
}
