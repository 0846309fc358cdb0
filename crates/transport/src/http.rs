use async_trait::async_trait;
use hivemind_core::{Error, LinkConfig, Result};
use std::time::Duration;
use tracing::debug;

use crate::Frame;

/// Plain request/response exchange used by the poll transport and by the
/// outbound side of the push transport.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET the link's URL and return the body.
    async fn fetch(&self, link: &str, config: &LinkConfig) -> Result<String>;

    /// POST one frame to the link's request channel.
    async fn post(&self, link: &str, config: &LinkConfig, frame: &Frame) -> Result<()>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, link: &str, config: &LinkConfig) -> Result<String> {
        let mut req = self.client.get(&config.url);
        for (k, v) in config.request_headers() {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.send().await.map_err(|e| Error::Connect {
            link: link.to_string(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connect {
                link: link.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        let body = response.text().await.map_err(|e| Error::Connect {
            link: link.to_string(),
            reason: e.to_string(),
        })?;
        debug!(link = %link, bytes = body.len(), "Fetched");
        Ok(body)
    }

    async fn post(&self, link: &str, config: &LinkConfig, frame: &Frame) -> Result<()> {
        let url = config.outbound_url.as_deref().unwrap_or(&config.url);
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(frame.text.clone());
        for (k, v) in config.request_headers() {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.send().await.map_err(|e| Error::Send {
            link: link.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(Error::Send {
                link: link.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}
