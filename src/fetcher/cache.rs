//! Response cache in front of a [`Fetcher`].
//!
//! Every pass of one ingestion operation (header, items, author lookups,
//! hub discovery) reads the same snapshot of a resource for an hour.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;
use crate::fetcher::{validate_url, FetchResponse, Fetcher};

pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Byte store with per-entry expiry, implemented by
/// [`crate::keyspace::Keyspace`].
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
}

pub struct CachingFetcher<F> {
    inner: F,
    cache: Arc<dyn ResponseCache>,
    ttl: Duration,
}

impl<F: Fetcher + Send + Sync> CachingFetcher<F> {
    pub fn new(inner: F, cache: Arc<dyn ResponseCache>) -> Self {
        Self::with_ttl(inner, cache, CACHE_TTL)
    }

    pub fn with_ttl(inner: F, cache: Arc<dyn ResponseCache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    fn cache_key(url: &str) -> String {
        format!("fetch:{}", url)
    }
}

#[async_trait]
impl<F: Fetcher + Send + Sync> Fetcher for CachingFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        validate_url(url)?;
        let key = Self::cache_key(url);

        if let Some(bytes) = self.cache.get(&key)? {
            match serde_json::from_slice::<FetchResponse>(&bytes) {
                Ok(response) => {
                    tracing::debug!("Cache hit for {}", url);
                    return Ok(response);
                }
                Err(e) => tracing::warn!("Discarding unreadable cache entry for {}: {}", url, e),
            }
        }

        let response = self.inner.fetch(url).await?;
        self.cache
            .set(&key, serde_json::to_vec(&response)?, self.ttl)?;

        Ok(response)
    }

    async fn head(&self, url: &str) -> Result<FetchResponse> {
        self.inner.head(url).await
    }
}
