//! Scenario tests for channel fan-out and subscriber sessions

#[cfg(test)]
mod tests {
    use crate::broadcast::*;
    use crate::error::BroadcastError;
    use crate::store::{MemoryStore, SubscriberStore};
    use crate::token::SignedTokenProvider;
    use crate::transport::Transport;
    use crate::types::{Channel, ChannelDefaults, FanoutJob, Subscriber};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use relay_queue::memory::MemoryStorage;
    use relay_queue::prelude::{RetryLayer, Storage, WorkerBuilder};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    // ============================================================
    // Fakes
    // ============================================================

    #[derive(Default)]
    struct RecordingTransport {
        pushes: Mutex<Vec<(String, serde_json::Value)>>,
        fail: AtomicBool,
    }

    impl RecordingTransport {
        fn pushes(&self) -> Vec<(String, serde_json::Value)> {
            self.pushes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn push(&self, token: &str, payload: &str) -> Result<()> {
            self.pushes
                .lock()
                .unwrap()
                .push((token.to_string(), serde_json::from_str(payload)?));
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("gateway unavailable");
            }
            Ok(())
        }
    }

    /// Memory store whose batch writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl SubscriberStore for FlakyStore {
        async fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
            self.inner.get_channel(id).await
        }

        async fn get_or_create_channel(&self, id: &str, defaults: ChannelDefaults) -> Result<Channel> {
            self.inner.get_or_create_channel(id, defaults).await
        }

        async fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>> {
            self.inner.get_subscriber(id).await
        }

        async fn list_subscribers(&self, channel_id: &str) -> Result<Vec<Subscriber>> {
            self.inner.list_subscribers(channel_id).await
        }

        async fn insert_or_get_subscriber(&self, subscriber: Subscriber) -> Result<(Subscriber, bool)> {
            self.inner.insert_or_get_subscriber(subscriber).await
        }

        async fn put_subscribers(&self, subscribers: &[Subscriber]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.inner.put_subscribers(subscribers).await
        }

        async fn delete_subscribers(&self, ids: &[String]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.inner.delete_subscribers(ids).await
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl TimeoutHook for RecordingHook {
        async fn on_timeout(&self, _channel: &Channel, evicted: &[Subscriber]) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(evicted.iter().map(|s| s.id.clone()).collect());
            Ok(())
        }
    }

    /// Fails its first `failures` calls, then records like [`RecordingHook`].
    struct FlakyHook {
        failures: AtomicUsize,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl TimeoutHook for FlakyHook {
        async fn on_timeout(&self, _channel: &Channel, evicted: &[Subscriber]) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("hook unavailable");
            }
            self.calls
                .lock()
                .unwrap()
                .push(evicted.iter().map(|s| s.id.clone()).collect());
            Ok(())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl TimeoutHook for FailingHook {
        async fn on_timeout(&self, _channel: &Channel, _evicted: &[Subscriber]) -> Result<()> {
            anyhow::bail!("hook exploded")
        }
    }

    struct Harness {
        broadcaster: Broadcaster,
        store: Arc<FlakyStore>,
        transport: Arc<RecordingTransport>,
        queue: MemoryStorage<FanoutJob>,
        hook: Arc<RecordingHook>,
        flaky_hook: Arc<FlakyHook>,
    }

    fn harness() -> Harness {
        let store = Arc::new(FlakyStore::default());
        let transport = Arc::new(RecordingTransport::default());
        let queue = MemoryStorage::new();
        let hook = Arc::new(RecordingHook::default());
        let flaky_hook = Arc::new(FlakyHook {
            failures: AtomicUsize::new(1),
            calls: Mutex::new(vec![]),
        });
        let hooks = TimeoutHooks::new()
            .register("record", hook.clone())
            .register("flaky", flaky_hook.clone())
            .register("explode", Arc::new(FailingHook));

        let broadcaster = Broadcaster::new(
            store.clone(),
            Arc::new(SignedTokenProvider::new("test-secret")),
            transport.clone(),
            Arc::new(queue.clone()),
        )
        .with_hooks(hooks);

        Harness {
            broadcaster,
            store,
            transport,
            queue,
            hook,
            flaky_hook,
        }
    }

    async fn subscriber_with(
        h: &Harness,
        channel: &Channel,
        name: &str,
        pong_age: Option<i64>,
        ping_age: Option<i64>,
    ) -> Subscriber {
        let now = Utc::now();
        let mut sub = h.broadcaster.create_subscriber(channel, name).await.unwrap();
        sub.last_pong = pong_age.map(|secs| now - Duration::seconds(secs));
        sub.last_ping = ping_age.map(|secs| now - Duration::seconds(secs));
        h.store.put_subscriber(&sub).await.unwrap();
        sub
    }

    fn job(channel: &Channel, on_timeout: Option<&str>) -> FanoutJob {
        FanoutJob {
            channel_id: channel.id.clone(),
            message: serde_json::json!({"text": "hi"}),
            on_timeout: on_timeout.map(str::to_string),
        }
    }

    // ============================================================
    // Channel lookup and scheduling
    // ============================================================

    #[tokio::test]
    async fn test_channel_is_get_or_create() {
        let h = harness();
        let first = h.broadcaster.channel("main").await.unwrap();
        let second = h.broadcaster.channel("main").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ping_interval, 60);
        assert_eq!(first.max_token_age, 6900);
    }

    #[tokio::test]
    async fn test_channel_uses_configured_defaults() {
        let h = harness();
        let broadcaster = h.broadcaster.clone().with_defaults(ChannelDefaults {
            ping_interval: 5,
            max_token_age: 50,
        });
        let channel = broadcaster.channel("fast").await.unwrap();
        assert_eq!(channel.ping_interval, 5);
        assert_eq!(channel.max_token_age, 50);
    }

    #[tokio::test]
    async fn test_channel_name_with_separator_is_rejected() {
        let h = harness();
        let err = h.broadcaster.channel("a:b").await.unwrap_err();
        assert!(matches!(err, BroadcastError::InvalidChannel(name) if name == "a:b"));
        assert!(h.broadcaster.channel("").await.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_names_with_separator_stay_in_their_channel() {
        let h = harness();
        let a = h.broadcaster.channel("a").await.unwrap();

        let sub = h.broadcaster.create_subscriber(&a, "b:c").await.unwrap();
        assert_eq!(sub.channel_id, "a");
        assert_eq!(sub.name, "b:c");
        assert_eq!(h.store.list_subscribers("a").await.unwrap().len(), 1);

        let forged = Channel::new("a:b", ChannelDefaults::default(), Utc::now());
        let err = h.broadcaster.create_subscriber(&forged, "c").await.unwrap_err();
        assert!(matches!(err, BroadcastError::InvalidChannel(_)));
        assert_eq!(h.store.list_subscribers("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_message_only_enqueues() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "alice", Some(5), None).await;

        h.broadcaster
            .send_message(&channel, &serde_json::json!({"text": "hi"}), Some("record"))
            .await
            .unwrap();

        assert!(h.transport.pushes().is_empty(), "nothing is pushed before the job runs");
        let queued = h.queue.fetch(FANOUT_QUEUE).await.unwrap().unwrap();
        assert_eq!(queued.payload, job(&channel, Some("record")));
    }

    // ============================================================
    // Direct sends
    // ============================================================

    #[tokio::test]
    async fn test_recent_pong_sends_without_probe() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = subscriber_with(&h, &channel, "alice", Some(30), None).await;
        let before = h.store.get_subscriber(&sub.id).await.unwrap();

        assert!(h.broadcaster.send_to_subscriber(&mut sub, "hi").await.unwrap());

        let pushes = h.transport.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(Some(pushes[0].0.as_str()), sub.token());
        assert_eq!(pushes[0].1["body"], "hi");
        assert_eq!(pushes[0].1["ping_request"], false);
        assert_eq!(h.store.get_subscriber(&sub.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_stale_pong_sends_probe_and_persists() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = subscriber_with(&h, &channel, "alice", Some(90), None).await;

        let before = Utc::now();
        assert!(h.broadcaster.send_to_subscriber(&mut sub, "hi").await.unwrap());
        let after = Utc::now();

        assert_eq!(h.transport.pushes()[0].1["ping_request"], true);
        let stored = h.store.get_subscriber(&sub.id).await.unwrap().unwrap();
        let last_ping = stored.last_ping.expect("probe recorded");
        assert!(last_ping >= before && last_ping <= after);
    }

    #[tokio::test]
    async fn test_outstanding_probe_is_renewed_and_persisted() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = subscriber_with(&h, &channel, "alice", Some(90), Some(5)).await;

        let before = Utc::now();
        assert!(h.broadcaster.send_to_subscriber(&mut sub, "hi").await.unwrap());

        assert_eq!(h.transport.pushes()[0].1["ping_request"], true);
        let stored = h.store.get_subscriber(&sub.id).await.unwrap().unwrap();
        assert!(stored.last_ping.unwrap() >= before, "probe time moves to this send");
    }

    #[tokio::test]
    async fn test_expired_probe_removes_subscriber_on_direct_send() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = subscriber_with(&h, &channel, "alice", Some(90), Some(15)).await;

        assert!(!h.broadcaster.send_to_subscriber(&mut sub, "hi").await.unwrap());
        assert!(h.transport.pushes().is_empty());
        assert!(h.store.get_subscriber(&sub.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_direct_send_without_token_is_a_fault() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut ghost = Subscriber::new(&channel.id, "ghost", Utc::now());
        h.store.insert_or_get_subscriber(ghost.clone()).await.unwrap();

        let err = h
            .broadcaster
            .send_to_subscriber(&mut ghost, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::MissingToken(_)));
    }

    #[tokio::test]
    async fn test_pong_clears_probe_and_next_send_is_plain() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = subscriber_with(&h, &channel, "alice", Some(90), Some(3)).await;

        h.broadcaster.pong(&mut sub).await.unwrap();
        let stored = h.store.get_subscriber(&sub.id).await.unwrap().unwrap();
        assert!(stored.last_ping.is_none());
        assert!(stored.last_pong.is_some());

        assert!(h.broadcaster.send_to_subscriber(&mut sub, "hi").await.unwrap());
        assert_eq!(h.transport.pushes()[0].1["ping_request"], false);
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_evict() {
        let h = harness();
        h.transport.fail.store(true, Ordering::SeqCst);
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = subscriber_with(&h, &channel, "alice", Some(5), None).await;

        assert!(h.broadcaster.send_to_subscriber(&mut sub, "hi").await.unwrap());
        assert!(h.store.get_subscriber(&sub.id).await.unwrap().is_some());
    }

    // ============================================================
    // Subscriber creation and tokens
    // ============================================================

    #[tokio::test]
    async fn test_create_subscriber_is_idempotent() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();

        let first = h.broadcaster.create_subscriber(&channel, "alice").await.unwrap();
        let second = h.broadcaster.create_subscriber(&channel, "alice").await.unwrap();

        assert_eq!(first, second);
        assert!(first.token().is_some(), "new subscriber gets a token");
        assert_eq!(h.store.list_subscribers("main").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creation_converges() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let broadcaster = h.broadcaster.clone();
            let channel = channel.clone();
            handles.push(tokio::spawn(async move {
                broadcaster.create_subscriber(&channel, "alice").await.unwrap()
            }));
        }

        let mut tokens = vec![];
        for handle in handles {
            tokens.push(handle.await.unwrap().token().map(str::to_string));
        }
        tokens.dedup();
        assert_eq!(tokens.len(), 1, "all creators see the same record");
        assert_eq!(h.store.list_subscribers("main").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_token_reuses_fresh_token() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = h.broadcaster.create_subscriber(&channel, "alice").await.unwrap();
        let original = sub.token().unwrap().to_string();

        let a = h.broadcaster.get_token(&mut sub, false).await.unwrap();
        let b = h.broadcaster.get_token(&mut sub, false).await.unwrap();
        assert_eq!(a, original);
        assert_eq!(b, original);
    }

    #[tokio::test]
    async fn test_get_token_force_reissues() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = h.broadcaster.create_subscriber(&channel, "alice").await.unwrap();
        let original = sub.token().unwrap().to_string();

        let forced = h.broadcaster.get_token(&mut sub, true).await.unwrap();
        assert_ne!(forced, original);
        let stored = h.store.get_subscriber(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.token(), Some(forced.as_str()));
    }

    #[tokio::test]
    async fn test_get_token_reissues_expired_token() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let mut sub = h.broadcaster.create_subscriber(&channel, "alice").await.unwrap();
        let original = sub.token().unwrap().to_string();
        sub.issue_token(original.clone(), Utc::now() - Duration::seconds(7000));

        let renewed = h.broadcaster.get_token(&mut sub, false).await.unwrap();
        assert_ne!(renewed, original);
        assert!(!sub.token_expired(channel.max_token_age(), Utc::now()));
    }

    #[tokio::test]
    async fn test_issued_tokens_verify_against_subscriber() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        let sub = h.broadcaster.create_subscriber(&channel, "alice").await.unwrap();
        let provider = SignedTokenProvider::new("test-secret");
        assert!(provider.verify(sub.token().unwrap(), "main:alice"));
    }

    // ============================================================
    // Fan-out
    // ============================================================

    #[tokio::test]
    async fn test_fanout_partitions_subscribers() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "fresh-1", Some(10), None).await;
        subscriber_with(&h, &channel, "fresh-2", Some(20), None).await;
        subscriber_with(&h, &channel, "stale", Some(120), None).await;
        subscriber_with(&h, &channel, "dead-1", Some(300), Some(20)).await;
        subscriber_with(&h, &channel, "dead-2", None, Some(11)).await;
        h.store
            .insert_or_get_subscriber(Subscriber::new("main", "tokenless", Utc::now()))
            .await
            .unwrap();

        let report = h.broadcaster.run_fanout(&job(&channel, Some("record"))).await.unwrap();

        assert_eq!(report.subscribers, 6);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.probed, 1);
        assert_eq!(report.evicted, vec!["main:dead-1", "main:dead-2"]);
        assert_eq!(report.skipped, vec!["main:tokenless"]);

        let remaining: Vec<String> = h
            .store
            .list_subscribers("main")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(
            remaining,
            vec!["main:fresh-1", "main:fresh-2", "main:stale", "main:tokenless"]
        );

        let stale = h.store.get_subscriber("main:stale").await.unwrap().unwrap();
        assert!(stale.last_ping.is_some(), "probe persisted");

        let calls = h.hook.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec!["main:dead-1".to_string(), "main:dead-2".to_string()]]);

        let probes: Vec<bool> = h
            .transport
            .pushes()
            .iter()
            .map(|(_, msg)| msg["ping_request"].as_bool().unwrap())
            .collect();
        assert_eq!(probes.iter().filter(|p| **p).count(), 1);
        assert_eq!(probes.len(), 3);
    }

    #[tokio::test]
    async fn test_fanout_without_evictions_skips_hook() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "alice", Some(1), None).await;

        let report = h.broadcaster.run_fanout(&job(&channel, Some("record"))).await.unwrap();
        assert!(report.evicted.is_empty());
        assert!(h.hook.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fanout_reexecution_is_safe() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "alive", Some(1), None).await;
        subscriber_with(&h, &channel, "dead", Some(300), Some(30)).await;

        let first = h.broadcaster.run_fanout(&job(&channel, Some("record"))).await.unwrap();
        let second = h.broadcaster.run_fanout(&job(&channel, Some("record"))).await.unwrap();

        assert_eq!(first.evicted, vec!["main:dead"]);
        assert!(second.evicted.is_empty());
        assert_eq!(second.delivered, 1);
        assert_eq!(h.transport.pushes().len(), 2, "duplicate delivery is acceptable");
    }

    #[tokio::test]
    async fn test_fanout_storage_failure_propagates() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "stale", Some(120), None).await;
        h.store.fail_writes.store(true, Ordering::SeqCst);

        let err = h.broadcaster.run_fanout(&job(&channel, None)).await.unwrap_err();
        assert!(matches!(err, BroadcastError::Storage(_)));
    }

    #[tokio::test]
    async fn test_fanout_missing_channel() {
        let h = harness();
        let job = FanoutJob {
            channel_id: "nowhere".to_string(),
            message: serde_json::Value::Null,
            on_timeout: None,
        };
        let err = h.broadcaster.run_fanout(&job).await.unwrap_err();
        assert!(matches!(err, BroadcastError::ChannelNotFound(id) if id == "nowhere"));
    }

    #[tokio::test]
    async fn test_fanout_hook_failure_fails_attempt() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "dead", None, Some(30)).await;

        let err = h
            .broadcaster
            .run_fanout(&job(&channel, Some("explode")))
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::Hook { ref name, .. } if name == "explode"));
        assert!(
            h.store.get_subscriber("main:dead").await.unwrap().is_some(),
            "nothing is deleted before the hook succeeds"
        );
    }

    #[tokio::test]
    async fn test_fanout_retry_hands_hook_same_evictions() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "dead", None, Some(30)).await;
        let job = job(&channel, Some("flaky"));

        assert!(h.broadcaster.run_fanout(&job).await.is_err());
        assert!(h.store.get_subscriber("main:dead").await.unwrap().is_some());

        let report = h.broadcaster.run_fanout(&job).await.unwrap();
        assert_eq!(report.evicted, vec!["main:dead"]);
        let calls = h.flaky_hook.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec!["main:dead".to_string()]]);
        assert!(h.store.get_subscriber("main:dead").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fanout_unknown_hook_is_ignored() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "dead", None, Some(30)).await;

        let report = h
            .broadcaster
            .run_fanout(&job(&channel, Some("missing")))
            .await
            .unwrap();
        assert_eq!(report.evicted, vec!["main:dead"]);
    }

    #[tokio::test]
    async fn test_queued_fanout_retries_after_storage_failure() {
        let h = harness();
        let channel = h.broadcaster.channel("main").await.unwrap();
        subscriber_with(&h, &channel, "dead", None, Some(30)).await;
        h.store.fail_writes.store(true, Ordering::SeqCst);

        h.broadcaster
            .send_message(&channel, "hello", Some("record"))
            .await
            .unwrap();

        let broadcaster = h.broadcaster.clone();
        let store = h.store.clone();
        let worker = WorkerBuilder::new(FANOUT_QUEUE)
            .backend(h.queue.clone())
            .layer(RetryLayer::new(|_| std::time::Duration::ZERO))
            .build_fn(move |job: FanoutJob| {
                let broadcaster = broadcaster.clone();
                let store = store.clone();
                async move {
                    let result = broadcaster.run_fanout(&job).await;
                    store.fail_writes.store(false, Ordering::SeqCst);
                    result?;
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(worker.run_until_idle().await.unwrap(), 2);
        assert!(h.store.get_subscriber("main:dead").await.unwrap().is_none());
        assert_eq!(
            h.hook.calls.lock().unwrap().len(),
            2,
            "hook sees the eviction on every attempt"
        );
        assert!(h.queue.dead_jobs().await.is_empty());
    }
}
