use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::FixedOffset;

use crate::{
    domain::{ChatId, Recipient},
    errors::Error,
    Result,
};

/// Process-level configuration, read from the environment (and `.env`).
///
/// Feed groups and webhook sinks live in the YAML file at `config_file`;
/// see [`crate::feed_config`].
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_users: Vec<ChatId>,
    pub telegram_channels: Vec<Recipient>,

    // Files
    pub config_file: PathBuf,
    pub sent_items_file: PathBuf,

    // Runtime
    pub config_poll_interval: Duration,
    pub display_offset: FixedOffset,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let telegram_users = parse_csv_i64(env_str("TELEGRAM_USERS"))
            .into_iter()
            .map(ChatId)
            .collect::<Vec<_>>();
        let telegram_channels = parse_csv(env_str("TELEGRAM_CHANNELS"))
            .iter()
            .filter_map(|c| Recipient::parse_channel(c))
            .collect::<Vec<_>>();

        if telegram_users.is_empty() && telegram_channels.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_USERS or TELEGRAM_CHANNELS must name at least one recipient"
                    .to_string(),
            ));
        }

        let config_file = env_path("RTB_CONFIG_FILE")
            .unwrap_or_else(|| PathBuf::from("config/config.yaml"));
        let sent_items_file = env_path("RTB_SENT_ITEMS_FILE")
            .unwrap_or_else(|| PathBuf::from("data/sent_items.txt"));

        let config_poll_interval =
            Duration::from_secs(env_u64("RTB_CONFIG_POLL_SECS").unwrap_or(60).max(1));

        let offset_hours = env_i32("RTB_DISPLAY_UTC_OFFSET_HOURS").unwrap_or(8);
        let display_offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
            Error::Config(format!(
                "RTB_DISPLAY_UTC_OFFSET_HOURS out of range: {offset_hours}"
            ))
        })?;

        Ok(Self {
            telegram_bot_token,
            telegram_users,
            telegram_channels,
            config_file,
            sent_items_file,
            config_poll_interval,
            display_offset,
        })
    }

    /// Every recipient the messaging sink should deliver to: users first, then channels.
    pub fn recipients(&self) -> Vec<Recipient> {
        self.telegram_users
            .iter()
            .copied()
            .map(Recipient::Chat)
            .chain(self.telegram_channels.iter().cloned())
            .collect()
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i32(key: &str) -> Option<i32> {
    env_str(key).and_then(|s| s.trim().parse::<i32>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    parse_csv(v)
        .into_iter()
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}
