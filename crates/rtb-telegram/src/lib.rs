//! Telegram adapter (teloxide).
//!
//! This crate implements the `rtb-core` MessagingPort over the Telegram Bot API.

use anyhow::Context;
use async_trait::async_trait;
use chrono::FixedOffset;

use teloxide::{prelude::*, types::ParseMode};

use tokio::time::sleep;

use rtb_core::{
    domain::{Notification, Recipient},
    errors::Error,
    formatting::render_notification_html,
    messaging::port::MessagingPort,
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    recipients: Vec<Recipient>,
    display_offset: FixedOffset,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, recipients: Vec<Recipient>, display_offset: FixedOffset) -> Self {
        Self {
            bot,
            recipients,
            display_offset,
        }
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Bot username from `getMe`; used as a startup token check.
    pub async fn identify(&self) -> anyhow::Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .context("telegram getMe failed")?;
        Ok(me.username().to_string())
    }

    fn tg_recipient(recipient: &Recipient) -> teloxide::types::Recipient {
        match recipient {
            Recipient::Chat(id) => teloxide::types::Recipient::Id(teloxide::types::ChatId(id.0)),
            Recipient::Channel(name) => teloxide::types::Recipient::ChannelUsername(name.clone()),
        }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::warn!(wait_secs = d.as_secs(), "telegram rate limited, waiting");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    async fn send_html(&self, recipient: &Recipient, html: &str) -> Result<()> {
        let target = Self::tg_recipient(recipient);
        self.with_retry(|| {
            self.bot
                .send_message(target.clone(), html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    /// Sends to every recipient. Succeeds when at least one accepted.
    async fn send_item(&self, notification: &Notification) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(Error::Delivery("no telegram recipients configured".to_string()));
        }

        let html = render_notification_html(notification, self.display_offset);
        let mut delivered = 0usize;
        let mut last_err = None;

        for recipient in &self.recipients {
            match self.send_html(recipient, &html).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, link = %notification.link, error = %e, "telegram send failed");
                    last_err = Some(e);
                }
            }
        }

        match (delivered, last_err) {
            (0, Some(e)) => Err(e),
            (0, None) => Err(Error::Delivery("no telegram recipient accepted the item".to_string())),
            (n, _) => {
                tracing::debug!(recipients = n, link = %notification.link, "telegram message sent");
                Ok(())
            }
        }
    }
}
