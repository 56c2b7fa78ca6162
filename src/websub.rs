//! WebSub subscriber: hub discovery, (un)subscription and signature checks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha1::Sha1;
use uuid::Uuid;

use crate::app::{Result, TributaryError};
use crate::domain::{Feed, FeedUpdate, PushState};
use crate::fetcher::Fetcher;
use crate::normalizer::Normalizer;
use crate::store::{SqliteStore, Store};

type HmacSha1 = Hmac<Sha1>;

pub const DEFAULT_LEASE_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Renew this long before a lease runs out.
const RENEW_MARGIN_SECONDS: i64 = 60 * 60;

/// Delay before retrying a subscription the hub has not verified.
pub const RETRY_SECONDS: i64 = 60 * 60;

const HUB_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLinks {
    pub hub: String,
    /// Canonical topic URL when the publisher declares one.
    pub topic: Option<String>,
}

/// Parse `Link` header values into `(url, rels)` pairs.
pub fn parse_link_header(value: &str) -> Vec<(String, Vec<String>)> {
    value
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            let start = part.find('<')?;
            let end = part.find('>')?;
            let url = part.get(start + 1..end)?.trim().to_string();
            let rels = part[end + 1..]
                .split(';')
                .filter_map(|param| {
                    let (key, value) = param.split_once('=')?;
                    (key.trim().eq_ignore_ascii_case("rel"))
                        .then(|| value.trim().trim_matches('"').to_string())
                })
                .flat_map(|rel| {
                    rel.split_ascii_whitespace()
                        .map(str::to_ascii_lowercase)
                        .collect::<Vec<_>>()
                })
                .collect();
            Some((url, rels))
        })
        .collect()
}

/// Check an `X-Hub-Signature` header against the body. A request without the
/// header is accepted.
pub fn verify_signature(secret: &str, header: Option<&str>, body: &[u8]) -> Result<()> {
    let Some(header) = header else {
        return Ok(());
    };

    let (algorithm, digest) = header
        .split_once('=')
        .ok_or_else(|| TributaryError::Signature("malformed signature header".into()))?;
    if algorithm != "sha1" {
        return Err(TributaryError::Signature(format!(
            "unsupported algorithm {}",
            algorithm
        )));
    }
    let expected = hex::decode(digest)
        .map_err(|_| TributaryError::Signature("signature is not hex".into()))?;

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| TributaryError::Signature(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| TributaryError::Signature("signature mismatch".into()))
}

/// `sha1=<hex>` signature of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| TributaryError::Signature(e.to_string()))?;
    mac.update(body);
    Ok(format!("sha1={}", hex::encode(mac.finalize().into_bytes())))
}

pub struct WebSub {
    client: Client,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    normalizer: Normalizer,
    store: Arc<SqliteStore>,
    base_url: String,
    lease_seconds: i64,
}

impl WebSub {
    pub fn new(
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        normalizer: Normalizer,
        store: Arc<SqliteStore>,
        base_url: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(HUB_TIMEOUT)
            .user_agent(concat!("tributary/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            fetcher,
            normalizer,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            lease_seconds: DEFAULT_LEASE_SECONDS,
        })
    }

    pub fn callback_url(&self, feed_id: i64) -> String {
        format!("{}/incoming/{}", self.base_url, feed_id)
    }

    /// Find the hub for a topic: `Link` headers from a HEAD request first,
    /// then `rel="hub"` links inside the document itself.
    pub async fn discover(&self, topic: &str) -> Result<Option<HubLinks>> {
        let mut hub = None;
        let mut self_url = None;

        match self.fetcher.head(topic).await {
            Ok(response) => {
                for value in response.header_values("link") {
                    for (url, rels) in parse_link_header(value) {
                        if rels.iter().any(|r| r == "hub") && hub.is_none() {
                            hub = Some(url.clone());
                        }
                        if rels.iter().any(|r| r == "self") && self_url.is_none() {
                            self_url = Some(url);
                        }
                    }
                }
            }
            Err(e) => tracing::debug!("HEAD {} failed: {}", topic, e),
        }

        if hub.is_none() {
            let response = self.fetcher.fetch(topic).await?;
            let content_type = response.content_type().to_string();
            hub = self
                .normalizer
                .rel_links(topic, &content_type, &response.body, "hub")
                .unwrap_or_default()
                .into_iter()
                .next();
            if self_url.is_none() {
                self_url = self
                    .normalizer
                    .rel_links(topic, &content_type, &response.body, "self")
                    .unwrap_or_default()
                    .into_iter()
                    .next();
            }
        }

        Ok(hub.map(|hub| HubLinks {
            hub,
            topic: self_url,
        }))
    }

    /// Discover the feed's hub and ask it for a subscription. A feed without
    /// a hub stays polling-only.
    ///
    /// Renewing at the same hub reuses the stored secret, so a refused renewal
    /// leaves the running subscription verifiable. Every attempt moves
    /// `resubscribe_at` forward by [`RETRY_SECONDS`]; the hub's verification
    /// replaces it with the granted lease.
    pub async fn subscribe(&self, feed: &Feed) -> Result<PushState> {
        let Some(links) = self.discover(&feed.url).await? else {
            tracing::debug!("No hub for {}; polling only", feed.url);
            return Ok(PushState::Unsubscribed);
        };

        let topic = links.topic.unwrap_or_else(|| feed.url.clone());
        let callback = self.callback_url(feed.id);
        let secret = match (&feed.secret, &feed.hub) {
            (Some(secret), Some(hub)) if *hub == links.hub => secret.clone(),
            _ => Uuid::new_v4().simple().to_string(),
        };

        // Stored before the request: the hub may verify and deliver at once.
        self.store.update_feed(
            feed.id,
            &FeedUpdate {
                hub: Some(links.hub.clone()),
                callback: Some(callback.clone()),
                secret: Some(secret.clone()),
                resubscribe_at: Some(Utc::now() + chrono::Duration::seconds(RETRY_SECONDS)),
                ..Default::default()
            },
        )?;

        let lease = self.lease_seconds.to_string();
        let response = self
            .client
            .post(&links.hub)
            .form(&[
                ("hub.mode", "subscribe"),
                ("hub.topic", topic.as_str()),
                ("hub.callback", callback.as_str()),
                ("hub.secret", secret.as_str()),
                ("hub.lease_seconds", lease.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TributaryError::Fetch(format!("{}: {}", links.hub, e)))?;

        if !response.status().is_success() {
            tracing::warn!(
                "Hub {} refused subscription to {}: {}",
                links.hub,
                topic,
                response.status()
            );
            return Ok(PushState::HubDiscovered);
        }

        tracing::info!("Requested WebSub subscription for {} at {}", topic, links.hub);
        Ok(PushState::SubscriptionRequested)
    }

    /// Record the lease the hub granted when it verified our intent.
    pub fn confirm(&self, feed_id: i64, lease_seconds: Option<i64>) -> Result<()> {
        let lease = lease_seconds.unwrap_or(self.lease_seconds);
        let renew_in = (lease - RENEW_MARGIN_SECONDS).max(lease / 2);
        self.store.update_feed(
            feed_id,
            &FeedUpdate {
                lease_seconds: Some(lease),
                resubscribe_at: Some(Utc::now() + chrono::Duration::seconds(renew_in)),
                ..Default::default()
            },
        )
    }

    pub async fn unsubscribe(&self, feed: &Feed) -> Result<()> {
        let (Some(hub), Some(callback)) = (&feed.hub, &feed.callback) else {
            return Ok(());
        };

        let response = self
            .client
            .post(hub)
            .form(&[
                ("hub.mode", "unsubscribe"),
                ("hub.topic", feed.url.as_str()),
                ("hub.callback", callback.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TributaryError::Fetch(format!("{}: {}", hub, e)))?;

        tracing::info!("Unsubscribed {} at {}: {}", feed.url, hub, response.status());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Form, Router};
    use tokio::net::TcpListener;

    use crate::fetcher::cache::tests::FakeFetcher;

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"items":[]}"#;
        let header = sign("s3cret", body).unwrap();
        assert!(header.starts_with("sha1="));
        assert!(verify_signature("s3cret", Some(&header), body).is_ok());
    }

    #[test]
    fn test_tampered_payload_or_digest_is_rejected() {
        let body = b"payload".to_vec();
        let header = sign("s3cret", &body).unwrap();

        let mut tampered = body.clone();
        tampered[0] ^= 1;
        assert!(matches!(
            verify_signature("s3cret", Some(&header), &tampered),
            Err(TributaryError::Signature(_))
        ));

        let mut digest = header.clone().into_bytes();
        let last = digest.len() - 1;
        digest[last] = if digest[last] == b'0' { b'1' } else { b'0' };
        let digest = String::from_utf8(digest).unwrap();
        assert!(verify_signature("s3cret", Some(&digest), &body).is_err());

        assert!(verify_signature("other", Some(&header), &body).is_err());
    }

    #[test]
    fn test_missing_header_is_accepted_malformed_is_not() {
        assert!(verify_signature("s3cret", None, b"x").is_ok());
        assert!(verify_signature("s3cret", Some("garbage"), b"x").is_err());
        assert!(verify_signature("s3cret", Some("sha1=zz"), b"x").is_err());
        assert!(verify_signature("s3cret", Some("md5=00"), b"x").is_err());
    }

    #[test]
    fn test_parse_link_header() {
        let links = parse_link_header(
            r#"<https://hub.example/>; rel="hub", <https://example.com/feed>; rel="self alternate""#,
        );
        assert_eq!(
            links,
            vec![
                ("https://hub.example/".to_string(), vec!["hub".to_string()]),
                (
                    "https://example.com/feed".to_string(),
                    vec!["self".to_string(), "alternate".to_string()]
                ),
            ]
        );
    }

    fn websub(fetcher: FakeFetcher, store: Arc<SqliteStore>) -> WebSub {
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(fetcher);
        WebSub::new(
            fetcher.clone(),
            Normalizer::new(fetcher),
            store,
            "https://reader.example/",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_discover_from_link_header() {
        let fetcher = FakeFetcher::new().with_head(
            "https://example.com/feed",
            &[("Link", r#"<https://hub.example/>; rel="hub""#)],
        );
        let ws = websub(fetcher, Arc::new(SqliteStore::in_memory().unwrap()));

        let links = ws.discover("https://example.com/feed").await.unwrap().unwrap();
        assert_eq!(links.hub, "https://hub.example/");
        assert_eq!(links.topic, None);
    }

    #[tokio::test]
    async fn test_discover_from_html_and_none() {
        let fetcher = FakeFetcher::new()
            .page(
                "https://example.com/",
                "text/html",
                r#"<html><head><link rel="hub" href="https://hub.example/"><link rel="self" href="https://example.com/"></head></html>"#,
            )
            .page("https://plain.example/", "text/html", "<html></html>");
        let ws = websub(fetcher, Arc::new(SqliteStore::in_memory().unwrap()));

        let links = ws.discover("https://example.com/").await.unwrap().unwrap();
        assert_eq!(links.hub, "https://hub.example/");
        assert_eq!(links.topic.as_deref(), Some("https://example.com/"));

        assert!(ws.discover("https://plain.example/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_posts_form_and_stores_secret() {
        let received: Arc<Mutex<Vec<Vec<(String, String)>>>> = Arc::default();
        let app = Router::new()
            .route(
                "/hub",
                post(
                    |State(seen): State<Arc<Mutex<Vec<Vec<(String, String)>>>>>,
                     Form(form): Form<Vec<(String, String)>>| async move {
                        seen.lock().unwrap().push(form);
                        axum::http::StatusCode::ACCEPTED
                    },
                ),
            )
            .with_state(received.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = format!("http://{}/hub", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_channel("inbox", "Inbox").unwrap();
        let mut feed = Feed::new("inbox", "https://example.com/feed".into());
        feed.id = store.add_feed(&feed).unwrap();

        let link = format!("<{}>; rel=\"hub\"", hub);
        let fetcher = FakeFetcher::new().with_head("https://example.com/feed", &[("Link", link.as_str())]);
        let ws = websub(fetcher, store.clone());

        let state = ws.subscribe(&feed).await.unwrap();
        assert_eq!(state, PushState::SubscriptionRequested);

        let stored = store.get_feed(feed.id).unwrap().unwrap();
        assert_eq!(stored.push_state(), PushState::SubscriptionRequested);
        let secret = stored.secret.clone().unwrap();

        let forms = received.lock().unwrap().clone();
        let form = &forms[0];
        let field = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(field("hub.mode").as_deref(), Some("subscribe"));
        assert_eq!(field("hub.topic").as_deref(), Some("https://example.com/feed"));
        assert_eq!(
            field("hub.callback"),
            Some(format!("https://reader.example/incoming/{}", feed.id))
        );
        assert_eq!(field("hub.secret"), Some(secret));

        ws.confirm(feed.id, Some(86400)).unwrap();
        let active = store.get_feed(feed.id).unwrap().unwrap();
        assert_eq!(active.push_state(), PushState::Active);
        assert!(!active.needs_resubscribe(Utc::now()));
    }

    /// Hub answering every request with `status`.
    pub(crate) async fn spawn_hub(status: axum::http::StatusCode) -> String {
        let app = Router::new().route("/hub", post(move || async move { status }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = format!("http://{}/hub", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        hub
    }

    #[tokio::test]
    async fn test_refused_renewal_keeps_secret_and_defers() {
        let hub = spawn_hub(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_channel("inbox", "Inbox").unwrap();
        let mut feed = Feed::new("inbox", "https://example.com/feed".into());
        feed.hub = Some(hub.clone());
        feed.secret = Some("old".into());
        feed.lease_seconds = Some(86400);
        feed.resubscribe_at = Some(Utc::now() - chrono::Duration::minutes(5));
        feed.id = store.add_feed(&feed).unwrap();

        let link = format!("<{}>; rel=\"hub\"", hub);
        let fetcher = FakeFetcher::new().with_head("https://example.com/feed", &[("Link", link.as_str())]);
        let ws = websub(fetcher, store.clone());

        assert_eq!(ws.subscribe(&feed).await.unwrap(), PushState::HubDiscovered);

        let stored = store.get_feed(feed.id).unwrap().unwrap();
        assert_eq!(stored.secret.as_deref(), Some("old"));
        assert_eq!(stored.push_state(), PushState::Active);
        assert!(!stored.needs_resubscribe(Utc::now()));

        let body = br#"{"items":[]}"#;
        let header = sign("old", body).unwrap();
        assert!(verify_signature(stored.secret.as_deref().unwrap(), Some(&header), body).is_ok());
    }
}
