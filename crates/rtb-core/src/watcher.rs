//! Hot reload of the YAML feed configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    feed_config::{load_feed_settings, FeedSettings},
    scheduler::FeedScheduler,
    Result,
};

pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    scheduler: FeedScheduler,
    applied: FeedSettings,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Load `path`, start pollers for it, and return a watcher tracking it.
    ///
    /// Errors here are startup errors: there is no previous configuration to
    /// fall back to.
    pub async fn bootstrap(
        path: impl Into<PathBuf>,
        poll_interval: Duration,
        scheduler: FeedScheduler,
    ) -> Result<Self> {
        let path = path.into();
        let last_modified = modified_at(&path);
        let settings = load_feed_settings(&path)?;

        let mut watcher = Self {
            path,
            poll_interval,
            scheduler,
            applied: FeedSettings::default(),
            last_modified,
        };
        watcher.install(settings).await;
        Ok(watcher)
    }

    pub fn applied(&self) -> &FeedSettings {
        &self.applied
    }

    /// Re-read the file if its mtime moved. Returns `true` when a new
    /// configuration was applied.
    pub async fn check_once(&mut self) -> Result<bool> {
        let modified = modified_at(&self.path);
        if modified == self.last_modified {
            return Ok(false);
        }

        tracing::info!(path = %self.path.display(), "config file changed");
        let settings = load_feed_settings(&self.path)?;
        self.last_modified = modified;

        if settings == self.applied {
            tracing::info!("config content unchanged; pollers left running");
            return Ok(false);
        }

        self.install(settings).await;
        Ok(true)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately; the file was just loaded.
        ticker.tick().await;

        tracing::info!(
            path = %self.path.display(),
            every_secs = self.poll_interval.as_secs(),
            "watching config file"
        );

        loop {
            tokio::select! {
              biased;
              _ = cancel.cancelled() => break,
              _ = ticker.tick() => {
                if let Err(e) = self.check_once().await {
                    tracing::error!(error = %e, "config reload failed; keeping current configuration");
                }
              }
            }
        }

        tracing::info!("config watcher stopped");
    }

    async fn install(&mut self, settings: FeedSettings) {
        if settings.webhooks != self.applied.webhooks {
            self.scheduler
                .dispatcher()
                .set_webhooks(settings.webhooks.clone())
                .await;
        }
        let started = self.scheduler.apply(settings.groups.clone()).await;
        tracing::info!(
            groups = settings.groups.len(),
            started,
            webhooks = settings.webhooks.len(),
            "configuration applied"
        );
        self.applied = settings;
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
