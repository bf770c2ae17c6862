use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Where the messaging sink delivers: a numeric chat or a public `@channel`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Recipient {
    Chat(ChatId),
    Channel(String),
}

impl Recipient {
    /// Parse a configured channel entry: numeric ids become chats, anything
    /// else is a channel username (the `@` is added when missing).
    pub fn parse_channel(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Some(Self::Chat(ChatId(id)));
        }
        if raw.starts_with('@') {
            Some(Self::Channel(raw.to_string()))
        } else {
            Some(Self::Channel(format!("@{raw}")))
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(id) => write!(f, "{}", id.0),
            Self::Channel(name) => f.write_str(name),
        }
    }
}

/// A configured set of feed URLs sharing interval, keywords and match policy.
///
/// Identity is the position in the active configuration list; groups are
/// replaced wholesale on reconfiguration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedGroup {
    pub urls: Vec<String>,
    pub interval: Duration,
    pub keywords: Vec<String>,
    pub label: String,
    pub allow_partial_match: bool,
    pub enabled: bool,
}

/// One entry from a parsed feed. Lives for a single poll cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    /// Dedup key.
    pub link: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

/// Outcome of running one item through dedup + keyword policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    AlreadyDelivered,
    NoFilterConfigured,
    Matched(Vec<String>),
    NoMatch,
}

impl MatchOutcome {
    pub fn should_deliver(&self) -> bool {
        matches!(self, Self::NoFilterConfigured | Self::Matched(_))
    }

    /// Keywords to render; empty for the no-filter case.
    pub fn keywords(&self) -> &[String] {
        match self {
            Self::Matched(k) => k,
            _ => &[],
        }
    }
}

/// What the messaging sink receives for one matched item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub link: String,
    pub group: String,
    pub published_at: DateTime<Utc>,
    pub matched_keywords: Vec<String>,
}

impl Notification {
    pub fn new(item: &Item, group: &str, matched_keywords: &[String]) -> Self {
        Self {
            title: item.title.clone(),
            link: item.link.clone(),
            group: group.to_string(),
            published_at: item.published_at,
            matched_keywords: matched_keywords.to_vec(),
        }
    }
}

/// A secondary, best-effort HTTP sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookTarget {
    pub name: String,
    pub url: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub enabled: bool,
}
