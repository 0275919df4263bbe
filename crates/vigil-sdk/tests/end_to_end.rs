//! End-to-end tests: producer, sync manager and consumer sessions wired
//! together over the in-memory transport.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use vigil_sdk::*;

fn p(text: &str) -> AttributePath {
    text.parse().unwrap()
}

/// Wait until `check` holds, for at most two seconds.
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

struct Link {
    producer: ProducerHandle,
    sync: Arc<SyncManager<MemoryTransport>>,
    consumers: Vec<Option<(MemoryTransport, tokio::sync::mpsc::Receiver<(PeerId, Message)>)>>,
    shutdown: watch::Sender<bool>,
}

impl Link {
    /// A producer on `peer-0` and `consumers` idle consumer transports.
    fn new(consumers: usize, config: SyncConfig) -> Self {
        let mut network = create_network(consumers + 1);
        let consumer_transports: Vec<_> = network
            .drain(1..)
            .map(|transport| {
                let inbox = transport.subscribe().unwrap();
                Some((transport, inbox))
            })
            .collect();
        let producer_transport = network.remove(0);
        let inbox = producer_transport.subscribe().unwrap();

        let (producer, _task) = Producer::spawn(ProducerConfig::default());
        let sync = Arc::new(SyncManager::new(
            Arc::new(producer_transport),
            producer.clone(),
            config,
        ));
        let (shutdown, stopped) = watch::channel(false);
        {
            let sync = sync.clone();
            tokio::spawn(async move { sync.run(inbox, stopped).await });
        }

        Self {
            producer,
            sync,
            consumers: consumer_transports,
            shutdown,
        }
    }

    /// Start consumer `index` as a running session and connect it.
    async fn join(&mut self, index: usize) -> Arc<Session<MemoryTransport>> {
        let (transport, inbox) = self.consumers[index].take().unwrap();
        let config = SessionConfigBuilder::new()
            .name(format!("viewer-{}", index))
            .producer(PeerId::new("peer-0"))
            .build();
        let session = Arc::new(Session::new(config, Arc::new(transport)));
        {
            let session = session.clone();
            let stopped = self.shutdown.subscribe();
            tokio::spawn(async move { session.run(inbox, stopped).await });
        }
        session.connect().await.unwrap();
        session
    }

    fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn recorder() -> (Arc<Mutex<Vec<Notification>>>, impl Observer + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |n: &Notification| sink.lock().push(n.clone()))
}

#[tokio::test]
async fn test_pending_subscription_receives_first_sample() {
    let mut link = Link::new(1, SyncConfig::default());
    let session = link.join(0).await;

    let interval = Duration::from_millis(50);
    let (seen, observer) = recorder();
    let id = session
        .watch(p("/memory/usage"), DeliveryPolicy::Interval(interval), observer)
        .unwrap();
    assert_eq!(session.subscriptions().state(id), Some(SubscriptionState::Pending));
    assert_eq!(
        session.subscriptions().current(id).unwrap()[0].value,
        AttributeValue::Absent
    );

    let version = link.producer.upsert(&p("/memory/usage"), 42i64).await.unwrap();
    eventually(|| session.mirror().version() >= version).await;

    let delivered = session.subscriptions().poll_at(Instant::now() + interval);
    assert_eq!(delivered, 1);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].value, AttributeValue::Integer(42));
    assert_eq!(session.subscriptions().state(id), Some(SubscriptionState::Active));

    link.stop();
}

#[tokio::test]
async fn test_push_subscription_follows_process_list() {
    let mut link = Link::new(1, SyncConfig::default());
    let session = link.join(0).await;

    let (seen, observer) = recorder();
    session
        .watch(p("/proc/_/name"), DeliveryPolicy::Push, observer)
        .unwrap();

    // Each step is mirrored before the next so no two land in one ChangeSet.
    let version = link.producer.upsert(&p("/proc/1/name"), "init").await.unwrap();
    eventually(|| session.mirror().version() >= version).await;
    let version = link.producer.upsert(&p("/proc/412/name"), "sshd").await.unwrap();
    eventually(|| session.mirror().version() >= version).await;
    let version = link.producer.upsert(&p("/memory/usage"), 10i64).await.unwrap();
    eventually(|| session.mirror().version() >= version).await;
    let version = link.producer.remove(&p("/proc/412")).await.unwrap();
    eventually(|| session.mirror().version() >= version).await;

    let changes: Vec<(String, Change)> = seen
        .lock()
        .iter()
        .map(|n| (n.path.to_string(), n.change))
        .collect();
    assert_eq!(
        changes,
        vec![
            ("/proc/1/name".to_string(), Change::Added),
            ("/proc/412/name".to_string(), Change::Added),
            ("/proc/412/name".to_string(), Change::Removed),
        ]
    );
    let names: Vec<String> = session
        .resolve(&p("/proc/_/name"))
        .into_iter()
        .map(|r| r.path.to_string())
        .collect();
    assert_eq!(names, vec!["/proc/1/name"]);

    link.stop();
}

#[tokio::test]
async fn test_late_joiner_resyncs_from_snapshot() {
    let mut link = Link::new(2, SyncConfig::default());
    let early = link.join(0).await;

    link.producer.upsert(&p("/cpu/0/model"), "x86").await.unwrap();
    link.producer.upsert(&p("/cpu/1/model"), "arm").await.unwrap();
    let version = link.producer.remove(&p("/cpu/1")).await.unwrap();
    eventually(|| early.mirror().version() >= version).await;
    eventually(|| link.producer.horizon() >= version).await;

    let mut events = link.sync.subscribe();
    let late = link.join(1).await;
    eventually(|| late.mirror().version() >= version).await;

    let snapshot_sent = loop {
        match events.recv().await.unwrap() {
            SyncEvent::Sent { peer_id, snapshot, .. } if peer_id == PeerId::new("peer-2") => {
                break snapshot
            }
            _ => continue,
        }
    };
    assert!(snapshot_sent);
    assert_eq!(
        late.resolve(&p("/cpu/_/model")),
        link.producer.resolve(&p("/cpu/_/model"))
    );
    assert_eq!(early.resolve(&p("/_/_/_")), late.resolve(&p("/_/_/_")));

    link.stop();
}

#[tokio::test]
async fn test_scheduler_and_close() {
    let mut link = Link::new(1, SyncConfig::default());
    let session = link.join(0).await;

    let (seen, observer) = recorder();
    session
        .watch(
            p("/uptime"),
            DeliveryPolicy::Interval(Duration::from_millis(5)),
            observer,
        )
        .unwrap();
    let scheduler = Scheduler::spawn(session.subscriptions().clone(), Duration::from_millis(5));

    link.producer
        .upsert(&p("/uptime"), Duration::from_secs(60))
        .await
        .unwrap();
    eventually(|| !seen.lock().is_empty()).await;

    session.close().await.unwrap();
    let before = seen.lock().len();
    let version = link.producer
        .upsert(&p("/uptime"), Duration::from_secs(61))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(seen.lock().len(), before);
    assert!(session.mirror().version() < version);
    scheduler.stop().await;
    link.stop();
}

#[tokio::test]
async fn test_departed_consumer_releases_tombstones() {
    let mut link = Link::new(2, SyncConfig::default());
    let stays = link.join(0).await;
    let leaves = link.join(1).await;
    let mut events = link.sync.subscribe();

    let version = link.producer.upsert(&p("/proc/7/name"), "cron").await.unwrap();
    eventually(|| leaves.mirror().version() >= version).await;
    eventually(|| link.sync.acked(&PeerId::new("peer-2")) >= version).await;
    leaves.close().await.unwrap();

    loop {
        if let SyncEvent::PeerLeft(peer_id) = events.recv().await.unwrap() {
            assert_eq!(peer_id, PeerId::new("peer-2"));
            break;
        }
    }
    assert_eq!(link.sync.peer_count(), 1);

    let removed = link.producer.remove(&p("/proc/7")).await.unwrap();
    eventually(|| stays.mirror().version() >= removed).await;
    eventually(|| link.producer.horizon() >= removed).await;
    assert_eq!(link.producer.tree().read().tombstone_count(), 0);
    assert!(leaves.mirror().version() < removed);

    link.stop();
}

#[test]
fn test_cpu_model_scenario_through_producer() {
    tokio_test::block_on(async {
        let (producer, _task) = Producer::spawn(ProducerConfig::default());
        producer.upsert(&p("/cpu/0/model"), "x86").await.unwrap();
        producer.upsert(&p("/cpu/1/model"), "arm").await.unwrap();

        let models: Vec<(String, AttributeValue)> = producer
            .resolve(&p("/cpu/_/model"))
            .into_iter()
            .map(|r| (r.path.to_string(), r.value))
            .collect();
        assert_eq!(
            models,
            vec![
                ("/cpu/0/model".to_string(), AttributeValue::from("x86")),
                ("/cpu/1/model".to_string(), AttributeValue::from("arm")),
            ]
        );

        producer.remove(&p("/cpu/1")).await.unwrap();
        let remaining = producer.resolve(&p("/cpu/_/model"));
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, p("/cpu/0/model"));
        assert!(producer.tree().read().node(&p("/cpu/1")).is_none());
    });
}
