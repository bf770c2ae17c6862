//! YAML configuration for feed groups and webhook sinks.
//!
//! The file is re-read at runtime by [`crate::watcher::ConfigWatcher`], so
//! loading is a pure `path -> FeedSettings` step with validation and defaults.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    domain::{FeedGroup, WebhookTarget},
    errors::Error,
    Result,
};

pub const DEFAULT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_GROUP_LABEL: &str = "Default";
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WEBHOOK_RETRIES: u32 = 3;

/// Validated feed + webhook configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedSettings {
    pub groups: Vec<FeedGroup>,
    pub webhooks: Vec<WebhookTarget>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFile {
    #[serde(default)]
    rss: Vec<RawGroup>,
    #[serde(default)]
    webhooks: Vec<RawWebhook>,
    /// Legacy single-sink form.
    #[serde(default)]
    webhook: Option<RawWebhook>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    group: String,
    #[serde(default)]
    allow_part_match: bool,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RawWebhook {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

pub fn load_feed_settings(path: &Path) -> Result<FeedSettings> {
    let text = fs::read_to_string(path)?;
    parse_feed_settings(&text).map_err(|e| Error::ConfigFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn parse_feed_settings(input: &str) -> Result<FeedSettings> {
    let raw: RawFile = if input.trim().is_empty() {
        RawFile::default()
    } else {
        serde_yaml::from_str(input)?
    };

    let groups = raw
        .rss
        .into_iter()
        .enumerate()
        .map(|(idx, g)| validate_group(idx + 1, g))
        .collect::<Result<Vec<_>>>()?;

    let mut webhooks = Vec::new();
    for (idx, w) in raw.webhooks.into_iter().enumerate() {
        webhooks.push(validate_webhook(idx + 1, w, None)?);
    }
    if let Some(legacy) = raw.webhook {
        // A disabled legacy block with no URL is just the default template; skip it.
        if !legacy.url.trim().is_empty() || legacy.enabled {
            let idx = webhooks.len() + 1;
            webhooks.push(validate_webhook(idx, legacy, Some("default"))?);
        }
    }

    Ok(FeedSettings { groups, webhooks })
}

fn validate_group(idx: usize, g: RawGroup) -> Result<FeedGroup> {
    if g.urls.is_empty() {
        return Err(Error::Config(format!("RSS #{idx}: urls is empty")));
    }

    let mut urls = Vec::with_capacity(g.urls.len());
    for (j, raw) in g.urls.iter().enumerate() {
        let u = raw.trim();
        if u.is_empty() {
            return Err(Error::Config(format!("RSS #{idx}: URL #{} is empty", j + 1)));
        }
        check_http_url(u)
            .map_err(|reason| Error::Config(format!("RSS #{idx}: URL #{} {reason}", j + 1)))?;
        urls.push(u.to_string());
    }

    let interval_secs = if g.interval <= 0 {
        DEFAULT_INTERVAL_SECS
    } else {
        g.interval as u64
    };

    let label = match g.group.trim() {
        "" => DEFAULT_GROUP_LABEL.to_string(),
        s => s.to_string(),
    };

    let keywords = g
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
        .collect();

    Ok(FeedGroup {
        urls,
        interval: Duration::from_secs(interval_secs),
        keywords,
        label,
        allow_partial_match: g.allow_part_match,
        enabled: g.enabled,
    })
}

fn validate_webhook(idx: usize, w: RawWebhook, fallback_name: Option<&str>) -> Result<WebhookTarget> {
    let url = w.url.trim();
    if url.is_empty() {
        return Err(Error::Config(format!("webhook #{idx}: url is empty")));
    }
    check_http_url(url).map_err(|reason| Error::Config(format!("webhook #{idx}: {reason}")))?;

    let name = match w.name.trim() {
        "" => fallback_name
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("webhook-{idx}")),
        s => s.to_string(),
    };

    Ok(WebhookTarget {
        name,
        url: url.to_string(),
        timeout: Duration::from_secs(
            w.timeout
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        ),
        retry_count: w.retry_count.unwrap_or(DEFAULT_WEBHOOK_RETRIES),
        enabled: w.enabled,
    })
}

fn check_http_url(raw: &str) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("is invalid: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("has unsupported scheme: {other}")),
    }
}
