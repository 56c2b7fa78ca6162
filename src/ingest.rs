//! The shared path from a fetched or pushed body to stored posts:
//! normalize, route, store into every target timeline, index, announce.

use chrono::{SecondsFormat, Utc};
use url::Url;
use uuid::Uuid;

use crate::app::{AppContext, Result, TributaryError};
use crate::broker::Event;
use crate::domain::{Content, Feed, FeedSummary, FeedUpdate, Item, Source, NOTIFICATIONS_CHANNEL};
use crate::fetcher::{validate_url, FetchResponse};
use crate::store::Store;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Fetch a URL and fail on non-2xx statuses.
async fn fetch_ok(ctx: &AppContext, url: &str) -> Result<FetchResponse> {
    let response = ctx.fetcher.fetch(url).await?;
    if !response.is_success() {
        return Err(TributaryError::Fetch(format!(
            "{} returned status {}",
            url, response.status
        )));
    }
    Ok(response)
}

/// Route one post from `home` and store it wherever it lands. Returns
/// whether it became visible in at least one channel.
pub fn store_item(ctx: &AppContext, mut item: Item, home: &str, feed: Option<&Feed>) -> Result<bool> {
    if item.published.is_empty() {
        item.published = now_rfc3339();
    }
    if let Some(feed) = feed {
        item.source = Some(Source {
            id: feed.id.to_string(),
            url: feed.url.clone(),
            name: feed.name.clone().unwrap_or_default(),
            photo: feed.photo.clone().unwrap_or_default(),
        });
    }

    let mut visible = false;
    for channel in ctx.router.route(&item, home)? {
        let timeline = ctx.timeline(&channel)?;
        if timeline.add_item(&item)? {
            visible = true;
            ctx.broker.publish(Event::NewItem {
                item: item.clone(),
                channel: channel.clone(),
            });
        }
        ctx.search.index(&item, &channel)?;
    }
    Ok(visible)
}

/// Normalize a body received for `feed` and store its posts in document
/// order. Returns the number of posts that became visible.
pub async fn ingest_body(ctx: &AppContext, feed: &Feed, content_type: &str, body: &[u8]) -> Result<usize> {
    let items = ctx.normalizer.feed_items(&feed.url, content_type, body).await?;

    let mut added = 0;
    for item in items {
        let uid = item.uid.clone();
        match store_item(ctx, item, &feed.channel_uid, Some(feed)) {
            Ok(true) => added += 1,
            Ok(false) => {}
            Err(e @ TributaryError::TimeParse(_)) => {
                tracing::warn!("Skipping {} from {}: {}", uid, feed.url, e);
            }
            Err(e) => return Err(e),
        }
    }
    tracing::debug!("{} new items from {}", added, feed.url);
    Ok(added)
}

/// Poll one feed.
pub async fn refresh_feed(ctx: &AppContext, feed: &Feed) -> Result<usize> {
    let response = fetch_ok(ctx, &feed.url).await?;
    ingest_body(ctx, feed, response.content_type(), &response.body).await
}

/// Attach `url` to a channel, run the first fetch and ask its hub (if any)
/// for push delivery. Following an already-followed URL is a no-op.
pub async fn follow(ctx: &AppContext, channel_uid: &str, url: &str) -> Result<Feed> {
    validate_url(url)?;
    if ctx.store.get_channel(channel_uid)?.is_none() {
        return Err(TributaryError::ChannelNotFound(channel_uid.to_string()));
    }
    if let Some(existing) = ctx.store.get_feed_by_url(channel_uid, url)? {
        return Ok(existing);
    }

    let feed_id = ctx.store.add_feed(&Feed::new(channel_uid, url.to_string()))?;
    tracing::info!("Following {} in {}", url, channel_uid);

    match fetch_ok(ctx, url).await {
        Ok(response) => {
            match ctx
                .normalizer
                .feed_header(url, response.content_type(), &response.body)
                .await
            {
                Ok(header) => {
                    let update = FeedUpdate {
                        name: Some(header.name).filter(|n| !n.is_empty()),
                        photo: Some(header.photo).filter(|p| !p.is_empty()),
                        ..Default::default()
                    };
                    ctx.store.update_feed(feed_id, &update)?;
                }
                Err(e) => tracing::warn!("No feed header for {}: {}", url, e),
            }

            let feed = stored_feed(ctx, feed_id)?;
            ingest_body(ctx, &feed, response.content_type(), &response.body).await?;
        }
        Err(e) => tracing::warn!("First fetch of {} failed: {}", url, e),
    }

    let feed = stored_feed(ctx, feed_id)?;
    if let Err(e) = ctx.websub.subscribe(&feed).await {
        tracing::warn!("WebSub subscription for {} failed: {}", url, e);
    }
    stored_feed(ctx, feed_id)
}

pub async fn unfollow(ctx: &AppContext, channel_uid: &str, url: &str) -> Result<()> {
    let feed = ctx
        .store
        .get_feed_by_url(channel_uid, url)?
        .ok_or_else(|| TributaryError::FeedNotFound(url.to_string()))?;

    if let Err(e) = ctx.websub.unsubscribe(&feed).await {
        tracing::warn!("WebSub unsubscribe for {} failed: {}", url, e);
    }
    ctx.store.delete_feed(feed.id)?;
    tracing::info!("Unfollowed {} in {}", url, channel_uid);
    Ok(())
}

fn stored_feed(ctx: &AppContext, id: i64) -> Result<Feed> {
    ctx.store
        .get_feed(id)?
        .ok_or_else(|| TributaryError::FeedNotFound(id.to_string()))
}

/// Fetch and normalize without storing anything.
pub async fn preview(ctx: &AppContext, url: &str) -> Result<Vec<Item>> {
    let response = fetch_ok(ctx, url).await?;
    ctx.normalizer
        .feed_items(url, response.content_type(), &response.body)
        .await
}

/// Candidate feeds for a search query that is a URL or bare domain: the
/// page itself plus every alternate feed it links to.
pub async fn find_feeds(ctx: &AppContext, query: &str) -> Result<Vec<FeedSummary>> {
    let url = resolve_query(ctx, query.trim()).await?;
    let response = fetch_ok(ctx, &url).await?;
    let content_type = response.content_type();

    let mut feeds = Vec::new();
    match ctx
        .normalizer
        .feed_header(&url, content_type, &response.body)
        .await
    {
        Ok(header) => feeds.push(header),
        Err(e) => tracing::debug!("{} is not a feed itself: {}", url, e),
    }

    for alternate in ctx.normalizer.alternates(&url, content_type, &response.body)? {
        if feeds.iter().any(|f| f.url == alternate.url) {
            continue;
        }
        let mut summary = FeedSummary::new(&alternate.url);
        summary.name = alternate.title.unwrap_or_default();
        feeds.push(summary);
    }
    Ok(feeds)
}

/// Absolute URL for a query. Without a scheme, `https://` is tried first
/// and `http://` second.
async fn resolve_query(ctx: &AppContext, query: &str) -> Result<String> {
    if let Ok(url) = Url::parse(query) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(url.to_string());
        }
    }

    for scheme in ["https", "http"] {
        let Ok(candidate) = validate_url(&format!("{}://{}", scheme, query)) else {
            continue;
        };
        let candidate = candidate.to_string();
        match ctx.fetcher.head(&candidate).await {
            Ok(response) if response.is_success() => return Ok(candidate),
            Ok(response) => tracing::debug!("HEAD {}: {}", candidate, response.status),
            Err(e) => tracing::debug!("HEAD {} failed: {}", candidate, e),
        }
    }
    Err(TributaryError::BadRequest(format!("cannot resolve '{}' to a URL", query)))
}

/// Post a message to the notifications channel.
pub fn notify(ctx: &AppContext, name: &str, text: &str) -> Result<()> {
    let mut item = Item::new(&format!("urn:uuid:{}", Uuid::new_v4()));
    item.name = Some(name.to_string());
    item.content = Some(Content {
        text: text.to_string(),
        html: String::new(),
    });
    item.published = now_rfc3339();

    let timeline = ctx.timeline(NOTIFICATIONS_CHANNEL)?;
    if timeline.add_item(&item)? {
        ctx.broker.publish(Event::NewItem {
            item,
            channel: NOTIFICATIONS_CHANNEL.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::tests::context_with;
    use crate::domain::ChannelSetting;
    use crate::fetcher::cache::tests::FakeFetcher;
    use crate::search::GLOBAL_CHANNEL;

    const RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example</title>
        <link>https://example.com/</link>
        <item><guid>1</guid><title>First rust post</title><description>one</description>
        <pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate></item>
        <item><guid>2</guid><title>Second</title><description>two</description>
        <pubDate>Tue, 02 Jan 2024 10:00:00 +0000</pubDate></item>
        </channel></rss>"#;

    fn feed_in(ctx: &AppContext, channel: &str, url: &str) -> Feed {
        ctx.store.add_channel(channel, channel).unwrap();
        let mut feed = Feed::new(channel, url.into());
        feed.id = ctx.store.add_feed(&feed).unwrap();
        feed
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let ctx = context_with(FakeFetcher::new().page("https://example.com/rss", "application/rss+xml", RSS));
        let feed = feed_in(&ctx, "inbox", "https://example.com/rss");

        assert_eq!(refresh_feed(&ctx, &feed).await.unwrap(), 2);
        assert_eq!(refresh_feed(&ctx, &feed).await.unwrap(), 0);
        assert_eq!(ctx.timeline("inbox").unwrap().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_items_fan_out_and_get_indexed() {
        let ctx = context_with(FakeFetcher::new());
        let feed = feed_in(&ctx, "inbox", "https://example.com/rss");
        ctx.store.add_channel("rust", "Rust").unwrap();
        ctx.router
            .set(
                "rust",
                ChannelSetting {
                    include_regex: "(?i)rust".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut listener = ctx.broker.subscribe();
        let added = ingest_body(&ctx, &feed, "application/rss+xml", RSS.as_bytes())
            .await
            .unwrap();
        assert_eq!(added, 2);

        assert_eq!(ctx.timeline("rust").unwrap().count().unwrap(), 1);
        assert_eq!(ctx.search.query("rust", "first").unwrap().len(), 1);
        assert_eq!(ctx.search.query(GLOBAL_CHANNEL, "first").unwrap().len(), 2);

        let mut channels = Vec::new();
        for _ in 0..3 {
            match listener.recv().await.unwrap() {
                Event::NewItem { channel, item } => {
                    assert_eq!(item.source.as_ref().unwrap().url, "https://example.com/rss");
                    channels.push(channel);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        channels.sort();
        assert_eq!(channels, vec!["inbox", "inbox", "rust"]);
    }

    #[tokio::test]
    async fn test_missing_published_defaults_to_now() {
        let ctx = context_with(FakeFetcher::new());
        let feed = feed_in(&ctx, "inbox", "https://example.com/feed.json");
        let body = br#"{"items":[{"id":"abc","content_text":"hello"}]}"#;

        ingest_body(&ctx, &feed, "application/json", body).await.unwrap();

        let page = ctx.timeline("inbox").unwrap().items(None, None).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.items[0].published.is_empty());
        assert_eq!(page.items[0].id, Item::generate_id("abc"));
    }

    #[tokio::test]
    async fn test_bad_timestamp_skips_only_that_post() {
        let ctx = context_with(FakeFetcher::new());
        let feed = feed_in(&ctx, "inbox", "https://example.com/feed.json");
        let body = br#"{"items":[
            {"id":"bad","content_text":"x","date_published":"last tuesday"},
            {"id":"dated","content_text":"y","date_published":"2024-01-05"},
            {"id":"good","content_text":"z","date_published":"2024-01-05T10:00:00Z"}
        ]}"#;

        let added = ingest_body(&ctx, &feed, "application/json", body).await.unwrap();
        assert_eq!(added, 2);

        let page = ctx.timeline("inbox").unwrap().items(None, None).unwrap();
        let ids: Vec<_> = page.items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![Item::generate_id("good"), Item::generate_id("dated")]);
    }

    #[tokio::test]
    async fn test_follow_fetches_and_names_feed() {
        let ctx = context_with(FakeFetcher::new().page("https://example.com/rss", "application/rss+xml", RSS));
        ctx.store.add_channel("news", "News").unwrap();

        let feed = follow(&ctx, "news", "https://example.com/rss").await.unwrap();
        assert_eq!(feed.name.as_deref(), Some("Example"));
        assert_eq!(ctx.timeline("news").unwrap().count().unwrap(), 2);

        let again = follow(&ctx, "news", "https://example.com/rss").await.unwrap();
        assert_eq!(again.id, feed.id);

        assert!(matches!(
            follow(&ctx, "missing", "https://example.com/rss").await,
            Err(TributaryError::ChannelNotFound(_))
        ));

        unfollow(&ctx, "news", "https://example.com/rss").await.unwrap();
        assert!(ctx.store.get_feeds_by_channel("news").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_feeds_tries_https_first() {
        let page = r#"<html><head><title>Example</title>
            <link rel="alternate" type="application/rss+xml" title="Posts" href="/rss"></head>
            <body></body></html>"#;
        let ctx = context_with(
            FakeFetcher::new()
                .page("https://example.com/", "text/html", page)
                .with_head("https://example.com/", &[("Content-Type", "text/html")]),
        );

        let feeds = find_feeds(&ctx, "example.com").await.unwrap();
        assert_eq!(feeds[0].url, "https://example.com/");
        let alternate = feeds.iter().find(|f| f.url == "https://example.com/rss").unwrap();
        assert_eq!(alternate.name, "Posts");
    }

    #[tokio::test]
    async fn test_notify_lands_in_notifications() {
        let ctx = context_with(FakeFetcher::new());
        notify(&ctx, "Refresh failed", "https://example.com/rss: timed out").unwrap();

        let page = ctx.timeline(NOTIFICATIONS_CHANNEL).unwrap().items(None, None).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name.as_deref(), Some("Refresh failed"));
    }
}
