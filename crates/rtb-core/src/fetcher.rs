//! HTTP retrieval + RSS/Atom parsing for a single feed URL.

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, UPGRADE_INSECURE_REQUESTS};
use thiserror::Error;

use crate::{domain::Item, errors::Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Errors from one fetch attempt. All of them are retried.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, timeout).
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("http error: status {0}")]
    HttpStatus(u16),
    #[error("response too large")]
    ResponseTooLarge,
    /// Payload is not RSS or Atom.
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Clone, Debug, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<Item>,
    /// Entries dropped because they carry no link to dedup on.
    pub skipped: usize,
}

#[derive(Clone, Debug)]
pub struct FeedFetcher {
    http: reqwest::Client,
    max_attempts: u32,
    max_body_bytes: usize,
    retry_delay_min: Duration,
    retry_delay_max: Duration,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .default_headers(browser_headers())
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;

        Ok(Self {
            http,
            max_attempts: MAX_ATTEMPTS,
            max_body_bytes: MAX_FEED_SIZE,
            retry_delay_min: Duration::from_secs(1),
            retry_delay_max: Duration::from_secs(5),
        })
    }

    /// Override the jittered pause between attempts.
    pub fn with_retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.retry_delay_min = min;
        self.retry_delay_max = max.max(min);
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Fetch and parse `url`, retrying transient failures.
    ///
    /// Returns the last error once the attempt budget is spent.
    pub async fn fetch(&self, url: &str) -> std::result::Result<ParsedFeed, FetchError> {
        let mut attempt = 1u32;
        loop {
            match self.fetch_once(url).await {
                Ok(feed) => {
                    if feed.skipped > 0 {
                        tracing::warn!(feed = %url, skipped = feed.skipped, "entries without link skipped");
                    }
                    return Ok(feed);
                }
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.jitter();
                    tracing::warn!(
                        feed = %url,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "feed fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<ParsedFeed, FetchError> {
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, self.max_body_bytes).await?;
        parse_feed(&bytes)
    }

    fn jitter(&self) -> Duration {
        let min = self.retry_delay_min.as_millis() as u64;
        let max = self.retry_delay_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Stream the body, giving up as soon as it grows past `limit`.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> std::result::Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

/// Parse an RSS/Atom payload into items.
pub fn parse_feed(bytes: &[u8]) -> std::result::Result<ParsedFeed, FetchError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
    let fetched_at = Utc::now();

    let mut items = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0usize;
    for entry in feed.entries {
        let Some(link) = entry_link(&entry.links) else {
            skipped += 1;
            continue;
        };

        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();
        let published_at = entry.published.or(entry.updated).unwrap_or(fetched_at);

        items.push(Item {
            title,
            link,
            description,
            published_at,
        });
    }

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        items,
        skipped,
    })
}

/// The entry's page: the first `alternate` (or rel-less) link, else the first link.
fn entry_link(links: &[feed_rs::model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|l| !l.is_empty())
}
