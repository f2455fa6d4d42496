use crate::domain::StoreError;
use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Url};
use std::time::Duration;
use tracing::debug;

/// Thin Elasticsearch REST client: base URL, API key auth and request timeout
#[derive(Clone)]
pub struct ElasticsearchClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ElasticsearchClient {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(url).with_context(|| format!("invalid Elasticsearch url: {url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Elasticsearch url cannot be used as a base: {url}");
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Elasticsearch HTTP client")?;

        debug!(url = %base_url, timeout = ?timeout, "created Elasticsearch client");
        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        let url = self.endpoint(std::iter::empty::<&str>())?;
        self.request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Build a URL below the base URL; each segment is percent-encoded
    pub fn endpoint<'a, I>(&self, segments: I) -> Result<Url, StoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport(format!("invalid base url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Start a request carrying the API key header when one is configured
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(reqwest::header::AUTHORIZATION, format!("ApiKey {key}")),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let client =
            ElasticsearchClient::new("http://localhost:9200", None, Duration::from_secs(1)).unwrap();

        let url = client.endpoint(["purchases", "_update", "a b"]).unwrap();

        assert_eq!(url.as_str(), "http://localhost:9200/purchases/_update/a%20b");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client =
            ElasticsearchClient::new("https://es.example.com/cluster/", None, Duration::from_secs(1))
                .unwrap();

        let url = client.endpoint(["_bulk"]).unwrap();

        assert_eq!(url.as_str(), "https://es.example.com/cluster/_bulk");
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(ElasticsearchClient::new("not a url", None, Duration::from_secs(1)).is_err());
    }
}
