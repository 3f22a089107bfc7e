//! Integration tests for the polling client and stream facade

use async_trait::async_trait;
use chunklog_client::{ErrorAction, PartitionStream, PollingClient, PollingConfig, StreamFactory};
use chunklog_core::{
    Chunk, Error, NO_LIMIT, Payload, Persistence, Recorder, Result, Subscription, WriteOutcome,
};
use chunklog_memory::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn payload(tag: &str) -> Payload {
    serde_json::json!({ "event": tag })
}

fn fast_config() -> PollingConfig {
    PollingConfig {
        interval: Duration::from_millis(10),
        ..PollingConfig::default()
    }
}

async fn seed(store: &MemoryStore, partition: &str, count: usize) {
    let ct = CancellationToken::new();
    for at in 0..count {
        store
            .append(partition, -1, payload(&format!("e{at}")), None, &ct)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn polling_catches_up_with_existing_writes() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "p", 5).await;

    let (sub, mut rx) = chunklog_core::ChannelSubscription::new(16);
    let client = PollingClient::with_config(store.clone(), sub, fast_config());
    client.start().unwrap();

    for at in 1..=5 {
        let chunk = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel open");
        assert_eq!(chunk.position, at);
    }

    let ct = CancellationToken::new();
    timeout(Duration::from_secs(5), client.wait_until_caught_up(&ct))
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(client.position(), 5);

    client.stop().await;
    assert!(!client.is_running());
}

#[tokio::test]
async fn polling_picks_up_new_writes() {
    let store = Arc::new(MemoryStore::new());
    let (sub, mut rx) = chunklog_core::ChannelSubscription::new(16);
    let client = PollingClient::with_config(store.clone(), sub, fast_config());
    client.start().unwrap();

    // Nothing to deliver yet; the client idles at position 0.
    let ct = CancellationToken::new();
    timeout(Duration::from_secs(5), client.wait_until_caught_up(&ct))
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(client.position(), 0);

    seed(&store, "p", 3).await;
    for at in 1..=3 {
        let chunk = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel open");
        assert_eq!(chunk.position, at);
    }
    client.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_restart_works() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "p", 2).await;

    let (sub, mut rx) = chunklog_core::ChannelSubscription::new(16);
    let client = PollingClient::with_config(store.clone(), sub, fast_config());

    client.start().unwrap();
    client.start().unwrap();
    assert!(client.is_running());

    for _ in 0..2 {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel open");
    }
    client.stop().await;
    client.stop().await;
    assert!(!client.is_running());

    // The subscription is handed back on stop; a restart resumes from the
    // last delivered position.
    seed(&store, "p", 1).await;
    client.start().unwrap();
    let chunk = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel open");
    assert_eq!(chunk.position, 3);
    client.stop().await;
}

struct FailingConsumer;

#[async_trait]
impl Subscription for FailingConsumer {
    async fn on_start(&mut self, _from: i64) -> Result<()> {
        Ok(())
    }
    async fn on_next(&mut self, _chunk: Chunk) -> Result<bool> {
        Err(Error::Other("projection failed".to_string()))
    }
    async fn completed(&mut self, _last: i64) {}
    async fn stopped(&mut self, _last: i64) {}
    async fn on_error(&mut self, _last: i64, _error: &Error) {}
}

#[tokio::test]
async fn halt_policy_stops_after_consumer_failure() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "p", 3).await;

    let config = PollingConfig {
        interval: Duration::from_millis(10),
        on_error: Arc::new(|_| ErrorAction::Halt),
        ..PollingConfig::default()
    };
    let client = PollingClient::with_config(store.clone(), FailingConsumer, config);
    client.start().unwrap();

    // The consumer fails on the first chunk, so the position never advances
    // past it and the loop halts instead of spinning.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.position(), 0);
    client.stop().await;
}

#[tokio::test]
async fn continue_policy_keeps_retrying_the_same_position() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "p", 1).await;

    let client = PollingClient::with_config(store.clone(), FailingConsumer, fast_config());
    client.start().unwrap();

    // A failed position is retried, never skipped.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.position(), 0);
    assert!(client.is_running());
    client.stop().await;
}

#[tokio::test]
async fn stream_facade_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let factory = StreamFactory::new(store.clone());
    let ct = CancellationToken::new();

    let stream: PartitionStream<MemoryStore> = factory.open("acct-9");
    assert!(stream.is_writable());
    assert_eq!(stream.id(), "acct-9");

    stream.append(payload("e1"), Some("op-1"), &ct).await.unwrap();
    stream.append(payload("e2"), Some("op-2"), &ct).await.unwrap();

    // Idempotent replay through the facade.
    let replay = stream.append(payload("e1"), Some("op-1"), &ct).await.unwrap();
    assert_eq!(replay, WriteOutcome::DuplicateOperation);

    let mut rec = Recorder::new();
    stream.read_all(&mut rec, &ct).await.unwrap();
    assert_eq!(rec.indexes(), vec![1, 2]);

    // Bounded reads still work for callers that want a window.
    let mut window = Recorder::new();
    stream.read(&mut window, 2, 2, &ct).await.unwrap();
    assert_eq!(window.indexes(), vec![2]);

    stream.delete(&ct).await.unwrap();
    let mut after = Recorder::new();
    stream.read_all(&mut after, &ct).await.unwrap();
    assert!(after.chunks().is_empty());
}

#[tokio::test]
async fn read_only_stream_refuses_writes() {
    let store = Arc::new(MemoryStore::new());
    let factory = StreamFactory::new(store.clone());
    let ct = CancellationToken::new();

    factory
        .open("p")
        .append(payload("e1"), Some("op"), &ct)
        .await
        .unwrap();

    let frozen = factory.open_read_only("p");
    assert!(!frozen.is_writable());

    let append = frozen.append(payload("e2"), None, &ct).await;
    assert!(matches!(append, Err(Error::ReadOnlyStream { .. })));
    let delete = frozen.delete(&ct).await;
    assert!(matches!(delete, Err(Error::ReadOnlyStream { .. })));

    // Reading through a read-only handle still works.
    let mut rec = Recorder::new();
    frozen.read_all(&mut rec, &ct).await.unwrap();
    assert_eq!(rec.chunks().len(), 1);

    // The store itself is untouched by the refused writes.
    assert_eq!(
        store.read_last_position(&ct).await.unwrap(),
        1,
        "refused writes must not consume positions"
    );
    let mut all = Recorder::new();
    store.read_all(1, &mut all, NO_LIMIT, &ct).await.unwrap();
    assert_eq!(all.positions(), vec![1]);
}
