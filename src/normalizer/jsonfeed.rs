//! JSON Feed 1.0 / 1.1.

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::app::{Result, TributaryError};
use crate::domain::{Card, Content, FeedSummary, Item};
use crate::normalizer::links::absolutize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonFeed {
    title: Option<String>,
    home_page_url: Option<String>,
    icon: Option<String>,
    favicon: Option<String>,
    author: Option<JsonAuthor>,
    authors: Vec<JsonAuthor>,
    items: Vec<JsonItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct JsonAuthor {
    name: Option<String>,
    url: Option<String>,
    avatar: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonItem {
    id: Option<Value>,
    url: Option<String>,
    external_url: Option<String>,
    title: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    summary: Option<String>,
    image: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    author: Option<JsonAuthor>,
    authors: Vec<JsonAuthor>,
    tags: Vec<String>,
}

impl JsonAuthor {
    fn to_card(&self) -> Card {
        Card {
            name: self.name.clone().unwrap_or_default(),
            url: self.url.clone().unwrap_or_default(),
            photo: self.avatar.clone().unwrap_or_default(),
            ..Card::new()
        }
    }
}

/// v1.1 `authors` wins over the v1.0 `author` field.
fn pick_author(authors: &[JsonAuthor], author: &Option<JsonAuthor>) -> Option<Card> {
    authors
        .first()
        .or(author.as_ref())
        .map(JsonAuthor::to_card)
}

fn parse(body: &[u8]) -> Result<JsonFeed> {
    serde_json::from_slice(body).map_err(|e| TributaryError::FeedParse(e.to_string()))
}

pub fn feed_header(url: &Url, body: &[u8]) -> Result<FeedSummary> {
    let feed = parse(body)?;
    let mut summary = FeedSummary::new(url.as_str());
    summary.name = feed.title.clone().unwrap_or_default();
    summary.photo = feed
        .icon
        .clone()
        .or_else(|| feed.favicon.clone())
        .unwrap_or_default();
    summary.author = pick_author(&feed.authors, &feed.author).filter(|c| !c.is_empty());
    Ok(summary)
}

pub fn feed_items(url: &Url, body: &[u8]) -> Result<Vec<Item>> {
    let feed = parse(body)?;
    let mut feed_author = pick_author(&feed.authors, &feed.author);
    if let Some(card) = feed_author.as_mut() {
        if card.url.is_empty() {
            card.url = feed.home_page_url.clone().unwrap_or_default();
        }
    }

    let items = feed
        .items
        .iter()
        .filter_map(|entry| {
            let uid = match &entry.id {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };
            let link = entry
                .url
                .clone()
                .or_else(|| entry.external_url.clone())
                .unwrap_or_default();
            if uid.is_empty() && link.is_empty() {
                return None;
            }
            let mut item = Item {
                kind: "entry".to_string(),
                uid,
                url: link,
                name: entry.title.clone().filter(|t| !t.is_empty()),
                summary: entry.summary.clone(),
                published: entry.date_published.clone().unwrap_or_default(),
                updated: entry.date_modified.clone().unwrap_or_default(),
                author: pick_author(&entry.authors, &entry.author).or_else(|| feed_author.clone()),
                photo: entry.image.iter().cloned().collect(),
                category: entry.tags.clone(),
                ..Default::default()
            };

            if entry.content_html.is_some() || entry.content_text.is_some() {
                item.content = Some(Content {
                    html: entry
                        .content_html
                        .as_deref()
                        .map(|h| absolutize(h, url))
                        .unwrap_or_default(),
                    text: entry.content_text.clone().unwrap_or_default(),
                });
            }
            Some(item)
        })
        .collect();

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/feed.json").unwrap()
    }

    const SAMPLE: &str = r#"{
        "version": "https://jsonfeed.org/version/1.1",
        "title": "Example JSON feed",
        "home_page_url": "https://example.com/",
        "icon": "https://example.com/icon.png",
        "authors": [{"name": "Dana", "avatar": "https://example.com/dana.png"}],
        "items": [
            {"id": "abc", "content_text": "hello"},
            {"id": 42, "url": "https://example.com/42", "title": "Answer",
             "content_html": "<p><a href=\"/q\">q</a></p>", "image": "https://example.com/42.png",
             "date_published": "2024-01-01T00:00:00Z",
             "author": {"name": "Eve", "url": "https://eve.example/"}}
        ]
    }"#;

    #[test]
    fn test_parse_items() {
        let items = feed_items(&url(), SAMPLE.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].uid, "abc");
        assert_eq!(items[0].content.as_ref().unwrap().text, "hello");
        assert!(items[0].published.is_empty());

        assert_eq!(items[1].uid, "42");
        assert_eq!(items[1].name.as_deref(), Some("Answer"));
        assert_eq!(items[1].photo, vec!["https://example.com/42.png".to_string()]);
        assert_eq!(
            items[1].content.as_ref().unwrap().html,
            r#"<p><a href="https://example.com/q">q</a></p>"#
        );
    }

    #[test]
    fn test_item_author_falls_back_to_feed_author() {
        let items = feed_items(&url(), SAMPLE.as_bytes()).unwrap();
        let fallback = items[0].author.as_ref().unwrap();
        assert_eq!(fallback.name, "Dana");
        assert_eq!(fallback.url, "https://example.com/");
        assert_eq!(items[1].author.as_ref().unwrap().name, "Eve");
    }

    #[test]
    fn test_feed_header() {
        let summary = feed_header(&url(), SAMPLE.as_bytes()).unwrap();
        assert_eq!(summary.name, "Example JSON feed");
        assert_eq!(summary.photo, "https://example.com/icon.png");
    }

    #[test]
    fn test_items_without_identity_are_dropped() {
        let body = br#"{"items":[
            {"content_text":"nobody"},
            {"title":"also nobody"},
            {"url":"https://example.com/kept","content_text":"kept"}
        ]}"#;
        let items = feed_items(&url(), body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://example.com/kept");
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        assert!(matches!(
            feed_items(&url(), b"{not json"),
            Err(TributaryError::FeedParse(_))
        ));
    }
}
