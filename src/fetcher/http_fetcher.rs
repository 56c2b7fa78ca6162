use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};

use crate::app::{Result, TributaryError};
use crate::fetcher::{validate_url, FetchResponse, Fetcher};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("tributary/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn buffer(url: &str, response: Response, with_body: bool) -> Result<FetchResponse> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = if with_body {
            response
                .bytes()
                .await
                .map_err(|e| TributaryError::Fetch(format!("{}: {}", url, e)))?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(FetchResponse {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let target = validate_url(url)?;
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| TributaryError::Fetch(format!("{}: {}", url, e)))?;

        Self::buffer(url, response, true).await
    }

    async fn head(&self, url: &str) -> Result<FetchResponse> {
        let target = validate_url(url)?;
        tracing::debug!("HEAD {}", url);

        let response = self
            .client
            .head(target)
            .send()
            .await
            .map_err(|e| TributaryError::Fetch(format!("{}: {}", url, e)))?;

        Self::buffer(url, response, false).await
    }
}
