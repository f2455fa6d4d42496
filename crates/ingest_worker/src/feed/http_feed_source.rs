use crate::feed::parse_feed_payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::domain::{FeedSource, FetchError, FetchResult, RawEvent};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, error, instrument};

#[derive(Debug, Clone)]
pub struct HttpFeedConfig {
    pub url: String,
    /// Optional `start` query parameter (page offset)
    pub start: Option<u64>,
    /// Optional `count` query parameter (page size)
    pub count: Option<u64>,
    pub timeout: Duration,
}

/// Sales feed reached over HTTP GET
pub struct HttpFeedSource {
    http: Client,
    url: Url,
}

impl HttpFeedSource {
    pub fn new(config: &HttpFeedConfig) -> Result<Self> {
        let mut url = Url::parse(&config.url)
            .with_context(|| format!("invalid feed url: {}", config.url))?;

        if config.start.is_some() || config.count.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(start) = config.start {
                query.append_pair("start", &start.to_string());
            }
            if let Some(count) = config.count {
                query.append_pair("count", &count.to_string());
            }
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build feed HTTP client")?;

        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> FetchResult<Vec<RawEvent>> {
        let result = async {
            let response = self.http.get(self.url.clone()).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                });
            }

            let body = response.bytes().await?;
            parse_feed_payload(&body)
        }
        .await;

        match &result {
            Ok(events) => debug!(event_count = events.len(), "fetched feed page"),
            Err(e) => error!(url = %self.url, error = %e, "feed fetch failed"),
        }

        result
    }
}
