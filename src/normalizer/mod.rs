pub mod html;
pub mod jsonfeed;
pub mod links;
pub mod mf2;
pub mod rss;

use std::sync::Arc;

use url::Url;

use crate::app::{Result, TributaryError};
use crate::domain::{Content, FeedSummary, Item};
use crate::fetcher::Fetcher;

pub use mf2::Alternate;

/// Source formats, chosen by content-type prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Html,
    JsonFeed,
    Xml,
}

impl Format {
    pub fn detect(content_type: &str) -> Option<Format> {
        const XML: [&str; 4] = [
            "text/xml",
            "application/xml",
            "application/rss+xml",
            "application/atom+xml",
        ];

        if content_type.starts_with("text/html") {
            Some(Format::Html)
        } else if content_type.starts_with("application/json")
            || content_type.starts_with("application/feed+json")
        {
            Some(Format::JsonFeed)
        } else if XML.iter().any(|t| content_type.starts_with(t)) {
            Some(Format::Xml)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct Normalizer {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
}

impl Normalizer {
    pub fn new(fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        Self { fetcher }
    }

    pub async fn feed_header(&self, url: &str, content_type: &str, body: &[u8]) -> Result<FeedSummary> {
        let base = Url::parse(url)?;
        let format = Format::detect(content_type)
            .ok_or_else(|| TributaryError::UnsupportedFormat(content_type.to_string()))?;

        let mut summary = match format {
            Format::Html => {
                let body = String::from_utf8_lossy(body).into_owned();
                html::feed_header(self.fetcher.as_ref(), &base, &body).await
            }
            Format::JsonFeed => jsonfeed::feed_header(&base, body)?,
            Format::Xml => rss::feed_header(&base, body)?,
        };

        if summary.author.as_ref().is_some_and(|a| a.is_empty()) {
            summary.author = None;
        }
        Ok(summary)
    }

    pub async fn feed_items(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<Item>> {
        let base = Url::parse(url)?;
        let Some(format) = Format::detect(content_type) else {
            tracing::warn!("Unsupported content type {:?} for {}", content_type, url);
            return Ok(Vec::new());
        };

        let mut items = match format {
            Format::Html => {
                let body = String::from_utf8_lossy(body).into_owned();
                html::feed_items(self.fetcher.as_ref(), &base, &body).await
            }
            Format::JsonFeed => jsonfeed::feed_items(&base, body)?,
            Format::Xml => rss::feed_items(&base, body)?,
        };

        for item in &mut items {
            finalize(item);
        }
        tracing::debug!("Normalized {} items from {}", items.len(), url);
        Ok(items)
    }

    /// Alternate feed links advertised by an HTML page.
    pub fn alternates(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<Alternate>> {
        if Format::detect(content_type) != Some(Format::Html) {
            return Ok(Vec::new());
        }
        let base = Url::parse(url)?;
        let doc = mf2::parse(&String::from_utf8_lossy(body), &base);
        Ok(doc.alternates)
    }

    /// `rel` link targets of a page or feed, such as `hub` or `self`.
    pub fn rel_links(&self, url: &str, content_type: &str, body: &[u8], rel: &str) -> Result<Vec<String>> {
        match Format::detect(content_type) {
            Some(Format::Html) => {
                let base = Url::parse(url)?;
                let doc = mf2::parse(&String::from_utf8_lossy(body), &base);
                Ok(doc.rels.get(rel).cloned().unwrap_or_default())
            }
            Some(Format::Xml) => rss::rel_links(body, rel),
            _ => Ok(Vec::new()),
        }
    }
}

fn finalize(item: &mut Item) {
    item.normalize_author();

    if let Some(content) = item.content.as_mut() {
        if content.text.is_empty() && !content.html.is_empty() {
            content.text = links::html_to_text(&content.html);
        }
    }
    if item.content.as_ref().is_some_and(|c: &Content| c.text.is_empty() && c.html.is_empty()) {
        item.content = None;
    }

    item.assign_id();
}
