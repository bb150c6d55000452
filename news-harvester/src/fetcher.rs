use crate::types::{FetchConfig, HarvesterError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Retrieves the raw payload of one feed.
///
/// Implementations must not retry: a failed fetch aborts the source's run and
/// the next scheduled cycle is the retry.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    fn max_bytes(&self) -> usize {
        self.config.max_feed_size_mb.saturating_mul(1024 * 1024)
    }

    fn check_size(&self, bytes: usize) -> Result<()> {
        if bytes > self.max_bytes() {
            return Err(HarvesterError::FeedTooLarge {
                size_mb: bytes.div_ceil(1024 * 1024),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FeedFetcher for Fetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(HarvesterError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(content_length) = response.content_length() {
            self.check_size(content_length as usize)?;
        }

        // Servers may omit or understate Content-Length, so the limit is also
        // enforced while the body streams in.
        let mut body: Vec<u8> = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk?);
            self.check_size(body.len())?;
        }

        info!(
            url,
            bytes = body.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "fetched feed"
        );
        Ok(body)
    }
}
