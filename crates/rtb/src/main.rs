use std::sync::Arc;

use teloxide::Bot;
use tokio_util::sync::CancellationToken;

use rtb_core::{
    config::Config,
    dedup::FileDedupStore,
    delivery::{webhook::WebhookClient, DeliveryDispatcher},
    fetcher::FeedFetcher,
    scheduler::FeedScheduler,
    watcher::ConfigWatcher,
};
use rtb_telegram::TelegramMessenger;

#[tokio::main]
async fn main() -> Result<(), rtb_core::Error> {
    rtb_core::logging::init("rtb")?;

    let cfg = Config::load()?;

    let messenger = TelegramMessenger::new(
        Bot::new(cfg.telegram_bot_token.clone()),
        cfg.recipients(),
        cfg.display_offset,
    );
    match messenger.identify().await {
        Ok(username) => tracing::info!(bot = %username, recipients = messenger.recipients().len(), "telegram bot ready"),
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "telegram bot check failed; continuing"),
    }

    let store = Arc::new(FileDedupStore::open(&cfg.sent_items_file)?);
    tracing::info!(
        path = %store.path().display(),
        entries = store.entry_count().await,
        "dedup log ready"
    );
    let dispatcher = Arc::new(DeliveryDispatcher::new(
        Arc::new(messenger),
        Vec::new(),
        WebhookClient::new()?,
        cfg.display_offset,
    ));
    let scheduler = FeedScheduler::new(FeedFetcher::new()?, store, dispatcher);

    let watcher =
        ConfigWatcher::bootstrap(&cfg.config_file, cfg.config_poll_interval, scheduler.clone())
            .await?;

    let cancel = CancellationToken::new();
    let watcher_task = tokio::spawn(watcher.run(cancel.clone()));

    tracing::info!("rtb started; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    cancel.cancel();
    if let Err(e) = watcher_task.await {
        tracing::error!(error = %e, "config watcher ended abnormally");
    }
    scheduler.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}
