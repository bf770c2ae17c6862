//! Fan-out of a matched item to the messaging sink and every webhook sink.
//!
//! The messaging sink's result is the only one the caller sees; it gates the
//! dedup mark. Webhooks are best-effort: each runs in its own task, retries on
//! its own budget, and is awaited only so `deliver` returns after all sink
//! activity for the item has settled.

pub mod webhook;

use std::sync::Arc;

use chrono::FixedOffset;
use tokio::{sync::RwLock, task::JoinSet};

use crate::{
    domain::{Item, Notification, WebhookTarget},
    errors::Error,
    messaging::port::MessagingPort,
    Result,
};

use webhook::{SinkReport, WebhookClient, WebhookMessage};

/// Per-sink outcome of one delivery.
#[derive(Debug)]
pub struct DeliveryReport {
    pub primary: Result<()>,
    pub webhooks: Vec<SinkReport>,
}

pub struct DeliveryDispatcher {
    messenger: Arc<dyn MessagingPort>,
    webhooks: RwLock<Arc<Vec<WebhookTarget>>>,
    client: WebhookClient,
    display_offset: FixedOffset,
}

impl DeliveryDispatcher {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        webhooks: Vec<WebhookTarget>,
        client: WebhookClient,
        display_offset: FixedOffset,
    ) -> Self {
        Self {
            messenger,
            webhooks: RwLock::new(Arc::new(webhooks)),
            client,
            display_offset,
        }
    }

    /// Replace the webhook sink list. Deliveries already running keep the
    /// snapshot they started with.
    pub async fn set_webhooks(&self, webhooks: Vec<WebhookTarget>) {
        let enabled = webhooks.iter().filter(|w| w.enabled).count();
        *self.webhooks.write().await = Arc::new(webhooks);
        tracing::info!(enabled, "webhook sinks updated");
    }

    pub async fn webhooks(&self) -> Arc<Vec<WebhookTarget>> {
        self.webhooks.read().await.clone()
    }

    pub async fn deliver(&self, item: &Item, group: &str, matched_keywords: &[String]) -> Result<()> {
        self.deliver_with_report(item, group, matched_keywords)
            .await
            .primary
    }

    pub async fn deliver_with_report(
        &self,
        item: &Item,
        group: &str,
        matched_keywords: &[String],
    ) -> DeliveryReport {
        let notification = Notification::new(item, group, matched_keywords);

        let targets = self.webhooks().await;
        let mut tasks = JoinSet::new();
        if targets.iter().any(|t| t.enabled) {
            let msg = Arc::new(WebhookMessage::new(&notification, self.display_offset));
            for target in targets.iter().filter(|t| t.enabled).cloned() {
                let client = self.client.clone();
                let msg = msg.clone();
                tasks.spawn(async move { client.send(&target, &msg).await });
            }
        }

        let primary = self.messenger.send_item(&notification).await;
        match &primary {
            Ok(()) => tracing::info!(link = %item.link, group, "item delivered"),
            Err(e) => tracing::warn!(link = %item.link, group, error = %e, "messaging delivery failed"),
        }

        let mut webhooks = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => webhooks.push(report),
                Err(e) => {
                    tracing::error!(error = %e, "webhook task panicked");
                    webhooks.push(SinkReport {
                        name: "unknown".to_string(),
                        attempts: 0,
                        result: Err(Error::Delivery(format!("webhook task failed: {e}"))),
                    });
                }
            }
        }

        DeliveryReport { primary, webhooks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::Utc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct FakeMessenger {
        fail: AtomicBool,
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        async fn send_item(&self, n: &Notification) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::External("telegram down".to_string()));
            }
            self.sent.lock().unwrap().push(n.clone());
            Ok(())
        }
    }

    fn item() -> Item {
        Item {
            title: "Rust 1.80".to_string(),
            link: "https://example.com/rust".to_string(),
            description: "release".to_string(),
            published_at: Utc::now(),
        }
    }

    fn target(name: &str, url: String, retry_count: u32, enabled: bool) -> WebhookTarget {
        WebhookTarget {
            name: name.to_string(),
            url,
            timeout: Duration::from_secs(5),
            retry_count,
            enabled,
        }
    }

    fn dispatcher(messenger: Arc<FakeMessenger>, webhooks: Vec<WebhookTarget>) -> DeliveryDispatcher {
        DeliveryDispatcher::new(
            messenger,
            webhooks,
            WebhookClient::new()
                .unwrap()
                .with_backoff_unit(Duration::from_millis(1)),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    #[tokio::test]
    async fn failing_webhook_does_not_affect_primary_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let messenger = Arc::new(FakeMessenger::default());
        let d = dispatcher(
            messenger.clone(),
            vec![target("hook", server.uri(), 2, true)],
        );

        let report = d
            .deliver_with_report(&item(), "Tech", &["rust".to_string()])
            .await;
        assert!(report.primary.is_ok());
        assert_eq!(report.webhooks.len(), 1);
        assert_eq!(report.webhooks[0].attempts, 3);
        assert!(!report.webhooks[0].is_success());

        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].matched_keywords, vec!["rust".to_string()]);
    }

    #[tokio::test]
    async fn webhooks_run_even_when_messaging_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let messenger = Arc::new(FakeMessenger::default());
        messenger.fail.store(true, Ordering::SeqCst);
        let d = dispatcher(
            messenger.clone(),
            vec![target("hook", server.uri(), 0, true)],
        );

        let err = d.deliver(&item(), "Tech", &[]).await.unwrap_err();
        assert!(err.to_string().contains("telegram down"));
    }

    #[tokio::test]
    async fn sinks_are_isolated_and_disabled_ones_skipped() {
        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&good)
            .await;
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&bad)
            .await;
        let off = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&off)
            .await;

        let messenger = Arc::new(FakeMessenger::default());
        let d = dispatcher(
            messenger,
            vec![
                target("good", good.uri(), 3, true),
                target("bad", bad.uri(), 1, true),
                target("off", off.uri(), 3, false),
            ],
        );

        let report = d.deliver_with_report(&item(), "Tech", &[]).await;
        assert!(report.primary.is_ok());
        assert_eq!(report.webhooks.len(), 2);

        let good_report = report.webhooks.iter().find(|r| r.name == "good").unwrap();
        assert!(good_report.is_success());
        let bad_report = report.webhooks.iter().find(|r| r.name == "bad").unwrap();
        assert!(!bad_report.is_success());
        assert_eq!(bad_report.attempts, 2);
    }

    #[tokio::test]
    async fn webhook_list_can_be_swapped() {
        let messenger = Arc::new(FakeMessenger::default());
        let d = dispatcher(messenger, Vec::new());
        assert!(d.webhooks().await.is_empty());

        d.set_webhooks(vec![target("a", "http://127.0.0.1:9".to_string(), 0, false)])
            .await;
        assert_eq!(d.webhooks().await.len(), 1);

        // Only a disabled sink: nothing is spawned.
        let report = d.deliver_with_report(&item(), "Tech", &[]).await;
        assert!(report.webhooks.is_empty());
    }
}
