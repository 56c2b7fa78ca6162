pub mod cache;
pub mod http_fetcher;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{Result, TributaryError};

pub use cache::{CachingFetcher, ResponseCache, CACHE_TTL};
pub use http_fetcher::HttpFetcher;

/// A fully buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "hex_body")]
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// First value of a header, matched case-insensitively.
    pub fn header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.header_values(name).next()
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;

    /// HEAD request; never cached.
    async fn head(&self, url: &str) -> Result<FetchResponse>;
}

#[async_trait]
impl<T: Fetcher + Send + Sync + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        (**self).fetch(url).await
    }

    async fn head(&self, url: &str) -> Result<FetchResponse> {
        (**self).head(url).await
    }
}

/// Reject anything that is not an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| TributaryError::Fetch(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(TributaryError::Fetch(format!(
            "unsupported scheme {:?} in {}",
            scheme, url
        ))),
    }
}

mod hex_body {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_schemes() {
        assert!(validate_url("https://example.com/feed").is_ok());
        assert!(validate_url("http://example.com/feed").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/feed"),
            Err(TributaryError::Fetch(_))
        ));
        assert!(matches!(
            validate_url("example.com/feed"),
            Err(TributaryError::Fetch(_))
        ));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = FetchResponse {
            url: "https://example.com/".into(),
            status: 200,
            headers: vec![
                ("Content-Type".into(), "text/html; charset=utf-8".into()),
                ("link".into(), "<https://hub.example/>; rel=\"hub\"".into()),
                ("Link".into(), "<https://example.com/>; rel=\"self\"".into()),
            ],
            body: b"<html></html>".to_vec(),
        };
        assert_eq!(response.content_type(), "text/html; charset=utf-8");
        assert_eq!(response.header_values("LINK").count(), 2);
        assert!(response.is_success());
    }
}
