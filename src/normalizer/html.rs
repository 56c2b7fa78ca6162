//! Microformats pages → [`Item`]s.
//!
//! Parsed items are simplified to flat maps first and then mapped onto the
//! domain types field by field.

use serde_json::{Map, Value};
use url::Url;

use crate::domain::{Card, Content, FeedSummary, Item};
use crate::fetcher::Fetcher;
use crate::normalizer::links::absolutize;
use crate::normalizer::mf2::{self, Document, Mf2Item};

/// An author reference that may still need a fetch to resolve.
enum AuthorRef {
    Card(Card),
    Url(String),
}

pub async fn feed_header(fetcher: &(dyn Fetcher + Send + Sync), url: &Url, body: &str) -> FeedSummary {
    let (doc, feed) = parse_feed(url, body);
    let author = match representative_author(&doc, feed.as_ref(), url) {
        Some(author) => resolve_author(fetcher, author).await,
        None => None,
    };

    let mut summary = FeedSummary::new(url.as_str());
    summary.name = feed
        .as_ref()
        .and_then(|f| text(f, "name"))
        .or_else(|| author.as_ref().map(|a| a.name.clone()).filter(|n| !n.is_empty()))
        .or_else(|| doc.title.clone())
        .unwrap_or_default();
    summary.photo = feed
        .as_ref()
        .and_then(|f| text(f, "photo"))
        .or_else(|| author.as_ref().map(|a| a.photo.clone()))
        .unwrap_or_default();
    summary.author = author;
    summary
}

pub async fn feed_items(fetcher: &(dyn Fetcher + Send + Sync), url: &Url, body: &str) -> Vec<Item> {
    let (doc, feed) = parse_feed(url, body);

    let feed_author = match representative_author(&doc, feed.as_ref(), url) {
        Some(author) => resolve_author(fetcher, author).await,
        None => None,
    };

    let entries: Vec<Map<String, Value>> = match &feed {
        Some(feed) => feed
            .get("children")
            .and_then(Value::as_array)
            .map(|children| {
                children
                    .iter()
                    .filter_map(Value::as_object)
                    .filter(|c| c.get("type").and_then(Value::as_str) == Some("entry"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default(),
        None => doc
            .find_all("h-entry")
            .into_iter()
            .map(mf2::simplify)
            .collect(),
    };

    let mut items = Vec::new();
    for entry in entries {
        let mut item = item_from_map(&entry, url);
        if item.uid.is_empty() && item.url.is_empty() {
            tracing::debug!("Dropping entry without uid or url on {}", url);
            continue;
        }

        item.author = match author_ref(entry.get("author")) {
            Some(author) => resolve_author(fetcher, author).await,
            None => feed_author.clone(),
        };
        items.push(item);
    }
    items
}

/// Parse the page and pick its `h-feed`, if any, as a simplified map.
fn parse_feed(url: &Url, body: &str) -> (Document, Option<Map<String, Value>>) {
    let doc = mf2::parse(body, url);
    let feed = doc.find_all("h-feed").first().map(|f| mf2::simplify(f));
    (doc, feed)
}

fn representative_author(
    doc: &Document,
    feed: Option<&Map<String, Value>>,
    page: &Url,
) -> Option<AuthorRef> {
    if let Some(author) = feed.and_then(|f| author_ref(f.get("author"))) {
        return Some(author);
    }
    representative_card(doc, page).map(AuthorRef::Card)
}

/// The page's h-card whose url is the page itself, else its first h-card.
fn representative_card(doc: &Document, page: &Url) -> Option<Card> {
    let cards: Vec<&Mf2Item> = doc.items.iter().filter(|i| i.has_type("h-card")).collect();
    let same_page = |card: &Mf2Item| {
        card.text("url")
            .and_then(|u| Url::parse(&u).ok())
            .is_some_and(|u| same_url(&u, page))
    };
    cards
        .iter()
        .copied()
        .find(|card| same_page(card))
        .or_else(|| cards.first().copied())
        .map(|card| card_from_map(&mf2::simplify(card)))
}

fn same_url(a: &Url, b: &Url) -> bool {
    a.as_str().trim_end_matches('/') == b.as_str().trim_end_matches('/')
}

fn author_ref(value: Option<&Value>) -> Option<AuthorRef> {
    match first(value?)? {
        Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
            Some(AuthorRef::Url(s.clone()))
        }
        Value::String(s) => Some(AuthorRef::Card(Card {
            name: s.clone(),
            ..Card::new()
        })),
        Value::Object(map) => Some(AuthorRef::Card(card_from_map(map))),
        _ => None,
    }
}

/// Turn a bare author URL into a card by fetching the referenced page.
async fn resolve_author(fetcher: &(dyn Fetcher + Send + Sync), author: AuthorRef) -> Option<Card> {
    let url = match author {
        AuthorRef::Card(card) => return Some(card),
        AuthorRef::Url(url) => url,
    };

    let resolved = match fetcher.fetch(&url).await {
        Ok(response) if response.is_success() && response.content_type().starts_with("text/html") => {
            let body = String::from_utf8_lossy(&response.body);
            Url::parse(&url).ok().and_then(|page| {
                let doc = mf2::parse(&body, &page);
                representative_card(&doc, &page)
            })
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Could not resolve author {}: {}", url, e);
            None
        }
    };

    Some(resolved.unwrap_or_else(|| Card::with_url(&url)))
}

fn first(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(values) => values.first(),
        other => Some(other),
    }
}

fn all(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(values)) => values.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// Plain string form of a simplified property.
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    first(map.get(key)?).and_then(value_text)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(m) => m
            .get("value")
            .or_else(|| m.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

/// URL form of a property: nested items contribute their own `url`.
fn value_url(value: &Value) -> Option<String> {
    match value {
        Value::Object(m) => text(m, "url").or_else(|| value_text(value)),
        _ => value_text(value),
    }
}

fn card_from_map(map: &Map<String, Value>) -> Card {
    Card {
        kind: "card".to_string(),
        name: text(map, "name").unwrap_or_default(),
        url: map.get("url").and_then(first).and_then(value_url).unwrap_or_default(),
        photo: map.get("photo").and_then(first).and_then(value_url).unwrap_or_default(),
        locality: text(map, "locality").unwrap_or_default(),
        region: text(map, "region").unwrap_or_default(),
        country_name: text(map, "country-name").unwrap_or_default(),
        latitude: text(map, "latitude").unwrap_or_default(),
        longitude: text(map, "longitude").unwrap_or_default(),
    }
}

fn item_from_map(map: &Map<String, Value>, base: &Url) -> Item {
    let mut item = Item {
        kind: text(map, "type").unwrap_or_else(|| "entry".to_string()),
        name: text(map, "name"),
        summary: text(map, "summary"),
        published: text(map, "published").unwrap_or_default(),
        updated: text(map, "updated").unwrap_or_default(),
        url: map.get("url").and_then(first).and_then(value_url).unwrap_or_default(),
        uid: text(map, "uid").unwrap_or_default(),
        latitude: text(map, "latitude"),
        longitude: text(map, "longitude"),
        ..Default::default()
    };

    for (key, target) in [
        ("in-reply-to", &mut item.in_reply_to),
        ("like-of", &mut item.like_of),
        ("repost-of", &mut item.repost_of),
        ("bookmark-of", &mut item.bookmark_of),
    ] {
        for value in all(map.get(key)) {
            let Some(url) = value_url(value) else { continue };
            if let Value::Object(cite) = value {
                let mut r = item_from_map(cite, base);
                if r.url.is_empty() {
                    r.url = url.clone();
                }
                r.author = cite.get("author").and_then(first).and_then(|a| match a {
                    Value::Object(m) => Some(card_from_map(m)),
                    Value::String(s) => Some(Card::with_url(s)),
                    _ => None,
                });
                r.assign_id();
                item.refs.insert(url.clone(), r);
            }
            target.push(url);
        }
    }

    item.photo = all(map.get("photo")).into_iter().filter_map(value_url).collect();
    item.video = all(map.get("video")).into_iter().filter_map(value_url).collect();
    item.audio = all(map.get("audio")).into_iter().filter_map(value_url).collect();
    item.category = all(map.get("category")).into_iter().filter_map(value_text).collect();

    item.content = map.get("content").and_then(first).and_then(|c| match c {
        Value::Object(m) => Some(Content {
            html: m
                .get("html")
                .and_then(Value::as_str)
                .map(|h| absolutize(h, base))
                .unwrap_or_default(),
            text: m
                .get("text")
                .or_else(|| m.get("value"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        Value::String(s) => Some(Content {
            text: s.clone(),
            html: String::new(),
        }),
        _ => None,
    });

    item.checkin = map
        .get("checkin")
        .or_else(|| map.get("location"))
        .and_then(first)
        .and_then(Value::as_object)
        .map(card_from_map);

    // Implied names on notes repeat the content; keep only real titles.
    if let (Some(name), Some(content)) = (&item.name, &item.content) {
        let squash = |s: &str| s.split_whitespace().collect::<String>();
        if squash(name) == squash(&content.text) || squash(&content.text).starts_with(&squash(name)) {
            item.name = None;
        }
    }

    item
}
