//! RSS and Atom through feed-rs.

use feed_rs::model::{Entry, Feed, Link};
use feed_rs::parser;
use html_escape::decode_html_entities;
use url::Url;

use crate::app::{Result, TributaryError};
use crate::domain::{Card, Content, FeedSummary, Item};
use crate::normalizer::links::absolutize;

fn parse(body: &[u8]) -> Result<Feed> {
    // An entry without a guid gets an empty id so the link is used instead.
    parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(body)
        .map_err(|e| TributaryError::FeedParse(e.to_string()))
}

fn page_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

fn feed_card(feed: &Feed) -> Card {
    let person = feed.authors.first();
    Card {
        name: person
            .map(|p| p.name.clone())
            .or_else(|| feed.title.as_ref().map(|t| decode_html_entities(&t.content).to_string()))
            .unwrap_or_default(),
        url: person
            .and_then(|p| p.uri.clone())
            .or_else(|| page_link(&feed.links))
            .unwrap_or_default(),
        photo: feed_photo(feed),
        ..Card::new()
    }
}

fn feed_photo(feed: &Feed) -> String {
    feed.logo
        .as_ref()
        .or(feed.icon.as_ref())
        .map(|image| image.uri.clone())
        .unwrap_or_default()
}

pub fn feed_header(url: &Url, body: &[u8]) -> Result<FeedSummary> {
    let feed = parse(body)?;
    let mut summary = FeedSummary::new(url.as_str());
    summary.name = feed
        .title
        .as_ref()
        .map(|t| decode_html_entities(&t.content).to_string())
        .unwrap_or_default();
    summary.photo = feed_photo(&feed);
    summary.author = Some(feed_card(&feed)).filter(|c| !c.is_empty());
    Ok(summary)
}

pub fn feed_items(url: &Url, body: &[u8]) -> Result<Vec<Item>> {
    let feed = parse(body)?;
    let fallback = feed_card(&feed);
    Ok(feed
        .entries
        .iter()
        .map(|entry| entry_to_item(entry, &fallback, url))
        .collect())
}

/// Feed-level links with the given rel, such as a WebSub `hub`.
pub fn rel_links(body: &[u8], rel: &str) -> Result<Vec<String>> {
    let feed = parse(body)?;
    Ok(feed
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some(rel))
        .map(|l| l.href.clone())
        .collect())
}

fn entry_to_item(entry: &Entry, fallback: &Card, base: &Url) -> Item {
    let link = page_link(&entry.links).unwrap_or_default();

    let author = entry
        .authors
        .first()
        .map(|p| Card {
            name: p.name.clone(),
            url: p.uri.clone().unwrap_or_default(),
            photo: fallback.photo.clone(),
            ..Card::new()
        })
        .unwrap_or_else(|| fallback.clone());

    // Full content wins over the summary.
    let html = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()));

    let photo = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter().map(|t| t.image.uri.clone()))
        .take(1)
        .collect();

    Item {
        kind: "entry".to_string(),
        uid: entry.id.clone(),
        url: link,
        name: entry
            .title
            .as_ref()
            .map(|t| decode_html_entities(&t.content).to_string())
            .filter(|t| !t.is_empty()),
        published: entry
            .published
            .or(entry.updated)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default(),
        updated: entry.updated.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
        author: Some(author),
        category: entry.categories.iter().map(|c| c.term.clone()).collect(),
        photo,
        content: html.map(|h| Content {
            html: absolutize(&h, base),
            text: String::new(),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/feed.xml").unwrap()
    }

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com/</link>
    <image><url>https://example.com/logo.png</url><title>Test Feed</title><link>https://example.com/</link></image>
    <item>
      <title>Test Item 1</title>
      <link>https://example.com/item1</link>
      <guid>item-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
      <description>Short summary</description>
      <content:encoded><![CDATA[<p>Full <a href="/more">content</a></p>]]></content:encoded>
    </item>
    <item>
      <title>Test Item 2</title>
      <link>https://example.com/item2</link>
      <description>This is item 2</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Test Feed</title>
  <id>urn:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <author><name>Ann</name><uri>https://ann.example/</uri></author>
  <entry>
    <title>Atom Entry 1</title>
    <link href="https://example.com/atom1"/>
    <id>atom-entry-1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>This is Atom entry 1</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_rss_prefers_full_content() {
        let items = feed_items(&url(), RSS_SAMPLE.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].uid, "item-1");
        assert_eq!(
            items[0].content.as_ref().unwrap().html,
            r#"<p>Full <a href="https://example.com/more">content</a></p>"#
        );
        assert!(items[0].published.starts_with("2024-01-01T00:00:00"));
    }

    #[test]
    fn test_missing_guid_falls_back_to_link() {
        let mut items = feed_items(&url(), RSS_SAMPLE.as_bytes()).unwrap();
        assert_eq!(items[1].url, "https://example.com/item2");
        items[1].assign_id();
        assert_eq!(items[1].id, Item::generate_id("https://example.com/item2"));
    }

    #[test]
    fn test_feed_level_author_applies_to_items() {
        let items = feed_items(&url(), RSS_SAMPLE.as_bytes()).unwrap();
        let author = items[1].author.as_ref().unwrap();
        assert_eq!(author.name, "Test Feed");
        assert_eq!(author.photo, "https://example.com/logo.png");

        let atom = feed_items(&url(), ATOM_SAMPLE.as_bytes()).unwrap();
        let author = atom[0].author.as_ref().unwrap();
        assert_eq!(author.name, "Ann");
        assert_eq!(author.url, "https://ann.example/");
    }

    #[test]
    fn test_feed_header() {
        let summary = feed_header(&url(), ATOM_SAMPLE.as_bytes()).unwrap();
        assert_eq!(summary.name, "Atom Test Feed");
        assert_eq!(summary.url, "https://example.com/feed.xml");
    }

    #[test]
    fn test_hub_link() {
        let atom = r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom">
            <title>T</title><id>urn:t</id><updated>2024-01-01T00:00:00Z</updated>
            <link rel="hub" href="https://hub.example/"/>
            <link rel="self" href="https://example.com/feed.atom"/>
            </feed>"#;
        assert_eq!(
            rel_links(atom.as_bytes(), "hub").unwrap(),
            vec!["https://hub.example/".to_string()]
        );
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(
            feed_items(&url(), b"not a feed"),
            Err(TributaryError::FeedParse(_))
        ));
    }
}
