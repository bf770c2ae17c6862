//! Webhook sink: fixed JSON schema, POST with linear backoff retries.

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Notification, WebhookTarget},
    errors::Error,
    formatting::{format_timestamp, hashtag},
    Result,
};

/// Wire format POSTed to every webhook sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub group: String,
    pub keywords: String,
    pub timestamp: String,
}

/// Optional diagnostic body of a non-2xx webhook response.
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl WebhookMessage {
    pub fn new(n: &Notification, offset: FixedOffset) -> Self {
        let timestamp = format_timestamp(n.published_at, offset);
        let keywords = n.matched_keywords.join(", ");

        let mut description = format!("Group: {}", n.group);
        if !keywords.is_empty() {
            description.push_str(&format!(" | Keywords: {keywords}"));
        }
        description.push_str(&format!(" | Time: {timestamp}"));

        let mut content = format!("### 📰 [{}] RSS\n\n", n.group);
        content.push_str(&format!("**Title:** {}\n\n", n.title));
        // Link on its own line so chat clients render a preview.
        content.push_str(&format!("{}\n\n", n.link));
        if !n.matched_keywords.is_empty() {
            let tags = n
                .matched_keywords
                .iter()
                .map(|k| hashtag(k))
                .collect::<Vec<_>>()
                .join(" ");
            content.push_str(&format!("**Keywords:** {tags}\n\n"));
        }
        content.push_str(&format!("**Time:** {timestamp}"));

        Self {
            title: n.title.clone(),
            description,
            content,
            url: n.link.clone(),
            group: n.group.clone(),
            keywords,
            timestamp,
        }
    }
}

/// Outcome of delivering to one webhook sink.
#[derive(Debug)]
pub struct SinkReport {
    pub name: String,
    pub attempts: u32,
    pub result: Result<()>,
}

impl SinkReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Clone, Debug)]
pub struct WebhookClient {
    http: reqwest::Client,
    backoff_unit: Duration,
}

impl WebhookClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            backoff_unit: Duration::from_secs(1),
        })
    }

    /// Retry `n` waits `n * unit` before it is sent.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// POST `msg` to `target`, retrying up to `target.retry_count` times.
    pub async fn send(&self, target: &WebhookTarget, msg: &WebhookMessage) -> SinkReport {
        let mut last_err = Error::Delivery("no attempt made".to_string());
        let mut attempts = 0u32;

        for retry in 0..=target.retry_count {
            if retry > 0 {
                tracing::info!(webhook = %target.name, retry, "retrying webhook");
                tokio::time::sleep(self.backoff_unit * retry).await;
            }
            attempts += 1;

            match self.post_once(target, msg).await {
                Ok(()) => {
                    tracing::info!(webhook = %target.name, url = %target.url, attempts, "webhook delivered");
                    return SinkReport {
                        name: target.name.clone(),
                        attempts,
                        result: Ok(()),
                    };
                }
                Err(e) => {
                    tracing::warn!(webhook = %target.name, attempt = attempts, error = %e, "webhook attempt failed");
                    last_err = e;
                }
            }
        }

        tracing::error!(webhook = %target.name, attempts, error = %last_err, "webhook delivery gave up");
        SinkReport {
            name: target.name.clone(),
            attempts,
            result: Err(Error::Delivery(format!(
                "webhook {} failed after {attempts} attempts: {last_err}",
                target.name
            ))),
        }
    }

    async fn post_once(&self, target: &WebhookTarget, msg: &WebhookMessage) -> Result<()> {
        let resp = self
            .http
            .post(&target.url)
            .timeout(target.timeout)
            .json(msg)
            .send()
            .await
            .map_err(|e| Error::External(format!("webhook request error: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<WebhookResponse>(&body) {
            Ok(r) if !r.message.is_empty() => Err(Error::External(format!(
                "webhook returned {status}: {}",
                r.message
            ))),
            _ => Err(Error::External(format!("webhook returned {status}"))),
        }
    }
}
