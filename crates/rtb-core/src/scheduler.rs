//! Feed polling tasks and their reconciliation.
//!
//! - One tokio task per enabled feed group, each driven by its own interval
//! - Cycles within a group are sequential; groups run concurrently
//! - `apply()` cancels every task, waits for each to exit, then starts the new set
//! - Cancellation is observed only between ticks, so an in-flight cycle always
//!   finishes (and records its deliveries) before its task exits

use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    dedup::DedupStore,
    delivery::DeliveryDispatcher,
    domain::{FeedGroup, Item, MatchOutcome},
    fetcher::FeedFetcher,
    matching::match_keywords,
};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Counters for one poll cycle of one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub urls_failed: usize,
    pub items_seen: usize,
    pub already_delivered: usize,
    pub unmatched: usize,
    pub delivered: usize,
    pub delivery_failed: usize,
}

#[derive(Clone)]
pub struct FeedScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    fetcher: FeedFetcher,
    store: Arc<dyn DedupStore>,
    dispatcher: Arc<DeliveryDispatcher>,
    tasks: tokio::sync::Mutex<Vec<GroupTask>>,
}

struct GroupTask {
    label: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FeedScheduler {
    pub fn new(
        fetcher: FeedFetcher,
        store: Arc<dyn DedupStore>,
        dispatcher: Arc<DeliveryDispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                fetcher,
                store,
                dispatcher,
                tasks: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Arc<DeliveryDispatcher> {
        &self.inner.dispatcher
    }

    /// Replace the running task set with one task per enabled group.
    ///
    /// Every existing task is stopped and awaited first, including groups that
    /// are unchanged; their intervals restart from zero. Returns the number of
    /// tasks started.
    pub async fn apply(&self, groups: Vec<FeedGroup>) -> usize {
        let mut tasks = self.inner.tasks.lock().await;
        stop_all(&mut tasks).await;

        for (idx, group) in groups.into_iter().enumerate() {
            if !group.enabled {
                tracing::info!(group = %group.label, index = idx, "skipping disabled feed group");
                continue;
            }

            let cancel = CancellationToken::new();
            let label = group.label.clone();
            let scheduler = self.clone();
            let cancel_clone = cancel.clone();
            let handle = tokio::spawn(async move {
                scheduler.group_loop(idx, group, cancel_clone).await;
            });

            tasks.push(GroupTask {
                label,
                cancel,
                handle,
            });
        }

        tracing::info!(started = tasks.len(), "feed pollers started");
        tasks.len()
    }

    /// Stop every task and wait for them to exit.
    pub async fn shutdown(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        stop_all(&mut tasks).await;
    }

    pub async fn running_tasks(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .await
            .iter()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    async fn group_loop(&self, idx: usize, group: FeedGroup, cancel: CancellationToken) {
        let period = effective_interval(group.interval);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            group = %group.label,
            index = idx,
            urls = group.urls.len(),
            interval_secs = period.as_secs(),
            "feed poller running"
        );

        loop {
            tokio::select! {
              biased;
              _ = cancel.cancelled() => break,
              _ = ticker.tick() => {
                let stats = self.poll_group(&group).await;
                tracing::debug!(group = %group.label, ?stats, "poll cycle finished");
              }
            }
        }

        tracing::info!(group = %group.label, index = idx, "feed poller stopped");
    }

    /// Run one poll cycle: fetch each URL in order and deliver new matches.
    pub async fn poll_group(&self, group: &FeedGroup) -> CycleStats {
        let mut stats = CycleStats::default();
        if !group.enabled {
            return stats;
        }

        for url in &group.urls {
            tracing::info!(feed = %url, group = %group.label, "checking feed");
            let feed = match self.inner.fetcher.fetch(url).await {
                Ok(feed) => feed,
                Err(e) => {
                    tracing::error!(feed = %url, group = %group.label, error = %e, "feed fetch gave up");
                    stats.urls_failed += 1;
                    continue;
                }
            };

            tracing::debug!(
                feed = %url,
                title = feed.title.as_deref().unwrap_or(""),
                items = feed.items.len(),
                "feed fetched"
            );

            for item in &feed.items {
                stats.items_seen += 1;
                let outcome = self.evaluate(item, group).await;
                match outcome {
                    MatchOutcome::AlreadyDelivered => {
                        stats.already_delivered += 1;
                        continue;
                    }
                    MatchOutcome::NoMatch => {
                        stats.unmatched += 1;
                        continue;
                    }
                    MatchOutcome::NoFilterConfigured | MatchOutcome::Matched(_) => {}
                }

                tracing::info!(title = %item.title, link = %item.link, keywords = ?outcome.keywords(), "new item");
                match self
                    .inner
                    .dispatcher
                    .deliver(item, &group.label, outcome.keywords())
                    .await
                {
                    Ok(()) => {
                        stats.delivered += 1;
                        if let Err(e) = self.inner.store.mark_sent(&item.link).await {
                            tracing::error!(link = %item.link, error = %e, "failed to persist sent item");
                        }
                    }
                    Err(e) => {
                        stats.delivery_failed += 1;
                        tracing::warn!(link = %item.link, error = %e, "item not delivered; will retry next cycle");
                    }
                }
            }
        }

        stats
    }

    async fn evaluate(&self, item: &Item, group: &FeedGroup) -> MatchOutcome {
        if self.inner.store.was_sent(&item.link).await {
            return MatchOutcome::AlreadyDelivered;
        }
        match_keywords(item, &group.keywords, group.allow_partial_match)
    }
}

async fn stop_all(tasks: &mut Vec<GroupTask>) {
    if tasks.is_empty() {
        return;
    }

    for task in tasks.iter() {
        task.cancel.cancel();
    }
    for task in tasks.drain(..) {
        if let Err(e) = task.handle.await {
            tracing::error!(group = %task.label, error = %e, "feed poller ended abnormally");
        }
    }
    tracing::info!("feed pollers stopped");
}

fn effective_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        MIN_INTERVAL
    } else {
        interval
    }
}

// === Tests ===

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use chrono::FixedOffset;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::{
        dedup::MemoryDedupStore,
        delivery::webhook::WebhookClient,
        domain::{Notification, WebhookTarget},
        errors::Error,
        messaging::port::MessagingPort,
        Result,
    };

    const TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
  <item><title>Golang 1.22 released</title><link>https://example.com/go</link>
        <description>new toolchain</description></item>
  <item><title>Weekly digest</title><link>https://example.com/digest</link>
        <description>assorted links</description></item>
</channel></rss>"#;

    const OTHER_ITEM: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>o</title>
  <item><title>Tokio 2.0</title><link>https://example.com/tokio</link>
        <description>runtime</description></item>
</channel></rss>"#;

    #[derive(Default)]
    struct RecordingMessenger {
        fail: AtomicBool,
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingMessenger {
        fn links(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|n| n.link.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        async fn send_item(&self, n: &Notification) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::External("send failed".to_string()));
            }
            self.sent.lock().unwrap().push(n.clone());
            Ok(())
        }
    }

    fn scheduler_with(
        messenger: Arc<RecordingMessenger>,
        store: Arc<MemoryDedupStore>,
        webhooks: Vec<WebhookTarget>,
    ) -> FeedScheduler {
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            messenger,
            webhooks,
            WebhookClient::new()
                .unwrap()
                .with_backoff_unit(Duration::from_millis(1)),
            FixedOffset::east_opt(0).unwrap(),
        ));
        let fetcher = FeedFetcher::new()
            .unwrap()
            .with_retry_delay(Duration::ZERO, Duration::ZERO);
        FeedScheduler::new(fetcher, store, dispatcher)
    }

    fn group(urls: Vec<String>, keywords: &[&str], interval: Duration) -> FeedGroup {
        FeedGroup {
            urls,
            interval,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            label: "Tech".to_string(),
            allow_partial_match: false,
            enabled: true,
        }
    }

    async fn feed_server(body: &'static str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn unfiltered_group_delivers_each_item_once() {
        let server = feed_server(TWO_ITEMS).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(messenger.clone(), store.clone(), Vec::new());
        let g = group(vec![format!("{}/feed", server.uri())], &[], Duration::from_secs(60));

        let first = s.poll_group(&g).await;
        assert_eq!(first.delivered, 2);
        let second = s.poll_group(&g).await;
        assert_eq!(second.delivered, 0);
        assert_eq!(second.already_delivered, 2);

        assert_eq!(messenger.links().len(), 2);
        assert!(messenger
            .sent
            .lock()
            .unwrap()
            .iter()
            .all(|n| n.matched_keywords.is_empty()));
        assert!(store.was_sent("https://example.com/go").await);
    }

    #[tokio::test]
    async fn keyword_group_delivers_only_matches() {
        let server = feed_server(TWO_ITEMS).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(messenger.clone(), store.clone(), Vec::new());
        let g = group(
            vec![format!("{}/feed", server.uri())],
            &["go", "golang"],
            Duration::from_secs(60),
        );

        let stats = s.poll_group(&g).await;
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.unmatched, 1);

        let sent = messenger.sent.lock().unwrap().clone();
        assert_eq!(sent[0].link, "https://example.com/go");
        assert_eq!(sent[0].matched_keywords, vec!["golang".to_string()]);
        assert!(!store.was_sent("https://example.com/digest").await);
    }

    #[tokio::test]
    async fn failed_messaging_leaves_item_unmarked() {
        let server = feed_server(TWO_ITEMS).await;
        let messenger = Arc::new(RecordingMessenger::default());
        messenger.fail.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(messenger.clone(), store.clone(), Vec::new());
        let g = group(vec![format!("{}/feed", server.uri())], &[], Duration::from_secs(60));

        let stats = s.poll_group(&g).await;
        assert_eq!(stats.delivery_failed, 2);
        assert!(!store.was_sent("https://example.com/go").await);

        messenger.fail.store(false, Ordering::SeqCst);
        let stats = s.poll_group(&g).await;
        assert_eq!(stats.delivered, 2);
        assert!(store.was_sent("https://example.com/go").await);
    }

    #[tokio::test]
    async fn webhook_failure_does_not_block_dedup_mark() {
        let server = feed_server(TWO_ITEMS).await;
        let hook = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&hook)
            .await;

        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(
            messenger.clone(),
            store.clone(),
            vec![WebhookTarget {
                name: "hook".to_string(),
                url: hook.uri(),
                timeout: Duration::from_secs(5),
                retry_count: 1,
                enabled: true,
            }],
        );
        let g = group(vec![format!("{}/feed", server.uri())], &["golang"], Duration::from_secs(60));

        let stats = s.poll_group(&g).await;
        assert_eq!(stats.delivered, 1);
        assert!(store.was_sent("https://example.com/go").await);
        assert_eq!(hook.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failing_url_does_not_stop_the_rest_of_the_group() {
        let good = feed_server(TWO_ITEMS).await;
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&bad)
            .await;

        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(messenger.clone(), store, Vec::new());
        let g = group(
            vec![format!("{}/feed", bad.uri()), format!("{}/feed", good.uri())],
            &[],
            Duration::from_secs(60),
        );

        let stats = s.poll_group(&g).await;
        assert_eq!(stats.urls_failed, 1);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn disabled_groups_get_no_task_and_no_polls() {
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(messenger, store, Vec::new());

        let mut g = group(vec!["http://127.0.0.1:9/feed".to_string()], &[], Duration::from_secs(60));
        g.enabled = false;

        assert_eq!(s.apply(vec![g.clone()]).await, 0);
        assert_eq!(s.running_tasks().await, 0);
        assert_eq!(s.poll_group(&g).await, CycleStats::default());
    }

    #[tokio::test]
    async fn tasks_poll_on_their_interval_and_stop_on_shutdown() {
        let server = feed_server(TWO_ITEMS).await;
        let other = feed_server(OTHER_ITEM).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(messenger.clone(), store, Vec::new());
        let g1 = group(vec![format!("{}/feed", server.uri())], &[], Duration::from_millis(50));
        let g2 = group(vec![format!("{}/feed", other.uri())], &[], Duration::from_millis(50));

        assert_eq!(s.apply(vec![g1, g2]).await, 2);
        assert_eq!(s.running_tasks().await, 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(server.received_requests().await.unwrap().len() >= 2);

        s.shutdown().await;
        assert_eq!(s.running_tasks().await, 0);

        let after_shutdown = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), after_shutdown);

        // Repeated ticks never redeliver.
        let mut links = messenger.links();
        links.sort();
        assert_eq!(
            links,
            vec![
                "https://example.com/digest",
                "https://example.com/go",
                "https://example.com/tokio"
            ]
        );
    }

    #[tokio::test]
    async fn reconfigure_mid_cycle_waits_and_never_duplicates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(TWO_ITEMS)
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let messenger = Arc::new(RecordingMessenger::default());
        let store = Arc::new(MemoryDedupStore::new());
        let s = scheduler_with(messenger.clone(), store, Vec::new());
        let g = group(vec![format!("{}/feed", server.uri())], &["golang"], Duration::from_millis(50));

        s.apply(vec![g.clone()]).await;

        // Wait until the first cycle's fetch is in flight.
        let deadline = Instant::now() + Duration::from_secs(5);
        while server.received_requests().await.unwrap().is_empty() {
            assert!(Instant::now() < deadline, "first poll never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(messenger.links().is_empty());

        // Returns only after the old task finished its cycle.
        assert_eq!(s.apply(vec![g]).await, 1);
        assert_eq!(messenger.links(), vec!["https://example.com/go".to_string()]);
        assert_eq!(s.running_tasks().await, 1);

        // The restarted task sees the item as already delivered.
        tokio::time::sleep(Duration::from_millis(500)).await;
        s.shutdown().await;
        assert_eq!(messenger.links(), vec!["https://example.com/go".to_string()]);
        assert_eq!(s.running_tasks().await, 0);
    }

    #[test]
    fn zero_interval_is_clamped() {
        assert_eq!(effective_interval(Duration::ZERO), MIN_INTERVAL);
        assert_eq!(
            effective_interval(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }
}
