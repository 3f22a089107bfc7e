//! Push-based chunk delivery
//!
//! A [`Subscription`] consumes a chunk stream with a fixed lifecycle:
//!
//! ```text
//! on_start(from)
//!   -> on_next(chunk) -> bool        (zero or more)
//!   -> completed(last) | stopped(last) | on_error(last, err)
//! ```
//!
//! Backends do not talk to subscriptions directly; they push chunks through a
//! [`Delivery`], which owns the lifecycle ordering so every backend reports
//! identical terminal events. Consumer failures and cancellation both route
//! to `on_error`; a consumer returning `false` routes to `stopped`.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Consumer of a chunk stream.
///
/// Callbacks are invoked strictly serially per instance, but from arbitrary
/// worker threads. Producers never hold internal locks across a callback.
#[async_trait]
pub trait Subscription: Send {
    /// Invoked exactly once, before any chunk, with the initial position or
    /// index of the scan.
    async fn on_start(&mut self, from: i64) -> Result<()>;

    /// Invoked once per chunk, in the operation's sort order. Returning
    /// `false` asks the producer to stop; the terminal event is then
    /// `stopped` with the last delivered key.
    async fn on_next(&mut self, chunk: Chunk) -> Result<bool>;

    /// The producer exhausted the query naturally.
    async fn completed(&mut self, last: i64);

    /// The scan ended early: consumer asked to stop, or no chunk matched
    /// (in which case `last` is the initial position).
    async fn stopped(&mut self, last: i64);

    /// The read failed, the consumer failed, or the operation was cancelled.
    /// No further callbacks occur.
    async fn on_error(&mut self, last: i64, error: &Error);
}

/// Which chunk attribute a scan is ordered by; this is also the value handed
/// to terminal callbacks. Partition-scoped reads use the index, global and
/// operation-wide reads use the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Index,
    Position,
}

impl SortKey {
    fn of(&self, chunk: &Chunk) -> i64 {
        match self {
            SortKey::Index => chunk.index,
            SortKey::Position => chunk.position,
        }
    }
}

/// Drives one subscription through the delivery protocol.
///
/// Usage: `begin`, then `feed` each chunk while it returns `true`, then
/// exactly one of `complete` / `fail`.
pub struct Delivery<'a> {
    sub: &'a mut dyn Subscription,
    key: SortKey,
    start: i64,
    last: Option<i64>,
    finished: bool,
}

impl<'a> Delivery<'a> {
    pub fn new(sub: &'a mut dyn Subscription, key: SortKey, start: i64) -> Self {
        Self {
            sub,
            key,
            start,
            last: None,
            finished: false,
        }
    }

    /// Invoke `on_start`. Returns `false` if the consumer failed, in which
    /// case the error has been routed to `on_error` and the scan must not
    /// proceed.
    pub async fn begin(&mut self) -> bool {
        match self.sub.on_start(self.start).await {
            Ok(()) => true,
            Err(e) => {
                self.sub.on_error(self.start, &e).await;
                self.finished = true;
                false
            }
        }
    }

    /// Push one chunk. Returns `false` once the scan must stop, whether
    /// because the consumer asked to or because it failed; the terminal
    /// callback has already been issued in both cases.
    pub async fn feed(&mut self, chunk: Chunk) -> bool {
        if self.finished {
            return false;
        }
        let key = self.key.of(&chunk);
        match self.sub.on_next(chunk).await {
            Ok(true) => {
                self.last = Some(key);
                true
            }
            Ok(false) => {
                self.last = Some(key);
                self.sub.stopped(key).await;
                self.finished = true;
                false
            }
            Err(e) => {
                self.sub.on_error(key, &e).await;
                self.finished = true;
                false
            }
        }
    }

    /// Query exhausted: `completed(last)` if anything was delivered,
    /// `stopped(start)` if the reader could not advance.
    pub async fn complete(mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.last {
            Some(last) => self.sub.completed(last).await,
            None => self.sub.stopped(self.start).await,
        }
    }

    /// Terminate with an error (read failure or cancellation).
    pub async fn fail(mut self, error: Error) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.sub.on_error(self.last.unwrap_or(self.start), &error).await;
    }
}

/// Terminal event observed by a [`Recorder`]
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Completed(i64),
    Stopped(i64),
    Failed(i64, String),
}

/// Subscription that records everything it sees. The workhorse consumer for
/// tests and small reads.
#[derive(Debug, Default)]
pub struct Recorder {
    chunks: Vec<Chunk>,
    started_at: Option<i64>,
    terminal: Option<Terminal>,
    stop_after: Option<usize>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the producer to stop after `n` chunks have been delivered
    pub fn stopping_after(n: usize) -> Self {
        Self {
            stop_after: Some(n),
            ..Self::default()
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    /// Positions of the recorded chunks, in delivery order
    pub fn positions(&self) -> Vec<i64> {
        self.chunks.iter().map(|c| c.position).collect()
    }

    /// Indices of the recorded chunks, in delivery order
    pub fn indexes(&self) -> Vec<i64> {
        self.chunks.iter().map(|c| c.index).collect()
    }
}

#[async_trait]
impl Subscription for Recorder {
    async fn on_start(&mut self, from: i64) -> Result<()> {
        self.started_at = Some(from);
        Ok(())
    }

    async fn on_next(&mut self, chunk: Chunk) -> Result<bool> {
        self.chunks.push(chunk);
        Ok(match self.stop_after {
            Some(n) => self.chunks.len() < n,
            None => true,
        })
    }

    async fn completed(&mut self, last: i64) {
        self.terminal = Some(Terminal::Completed(last));
    }

    async fn stopped(&mut self, last: i64) {
        self.terminal = Some(Terminal::Stopped(last));
    }

    async fn on_error(&mut self, last: i64, error: &Error) {
        self.terminal = Some(Terminal::Failed(last, error.to_string()));
    }
}

/// Subscription that forwards chunks into an mpsc channel. Stops the
/// producer once the receiving side is gone.
pub struct ChannelSubscription {
    tx: mpsc::Sender<Chunk>,
}

impl ChannelSubscription {
    pub fn new(capacity: usize) -> (Self, ChunkStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, ChunkStream { rx })
    }
}

/// Receiving side of a [`ChannelSubscription`]
pub struct ChunkStream {
    rx: mpsc::Receiver<Chunk>,
}

impl ChunkStream {
    pub async fn recv(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Chunk> {
        self.rx.try_recv().ok()
    }
}

impl futures::Stream for ChunkStream {
    type Item = Chunk;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn on_start(&mut self, _from: i64) -> Result<()> {
        Ok(())
    }

    async fn on_next(&mut self, chunk: Chunk) -> Result<bool> {
        Ok(self.tx.send(chunk).await.is_ok())
    }

    async fn completed(&mut self, _last: i64) {}

    async fn stopped(&mut self, _last: i64) {}

    async fn on_error(&mut self, last: i64, error: &Error) {
        tracing::warn!("subscription channel terminated at {last}: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::codec::Payload;

    fn chunk(position: i64, index: i64) -> Chunk {
        Chunk {
            position,
            partition_id: "p".to_string(),
            index,
            operation_id: format!("op-{position}"),
            payload: Payload::Null,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn empty_scan_stops_at_initial() {
        let mut rec = Recorder::new();
        let delivery = Delivery::new(&mut rec, SortKey::Index, 5);
        delivery.complete().await;
        assert_eq!(rec.terminal(), Some(&Terminal::Stopped(5)));
        assert!(rec.chunks().is_empty());
    }

    #[tokio::test]
    async fn exhausted_scan_completes_at_last_key() {
        let mut rec = Recorder::new();
        let mut delivery = Delivery::new(&mut rec, SortKey::Index, 1);
        assert!(delivery.begin().await);
        assert!(delivery.feed(chunk(1, 1)).await);
        assert!(delivery.feed(chunk(2, 2)).await);
        assert!(delivery.feed(chunk(3, 3)).await);
        delivery.complete().await;

        assert_eq!(rec.started_at(), Some(1));
        assert_eq!(rec.indexes(), vec![1, 2, 3]);
        assert_eq!(rec.terminal(), Some(&Terminal::Completed(3)));
    }

    #[tokio::test]
    async fn position_key_used_for_global_scans() {
        let mut rec = Recorder::new();
        let mut delivery = Delivery::new(&mut rec, SortKey::Position, 1);
        assert!(delivery.begin().await);
        assert!(delivery.feed(chunk(9, 2)).await);
        delivery.complete().await;
        assert_eq!(rec.terminal(), Some(&Terminal::Completed(9)));
    }

    #[tokio::test]
    async fn consumer_false_stops_at_last_delivered() {
        let mut rec = Recorder::stopping_after(2);
        let mut delivery = Delivery::new(&mut rec, SortKey::Index, 1);
        assert!(delivery.begin().await);
        assert!(delivery.feed(chunk(1, 1)).await);
        assert!(!delivery.feed(chunk(2, 2)).await);
        // A second terminal must not overwrite the first.
        delivery.complete().await;

        assert_eq!(rec.chunks().len(), 2);
        assert_eq!(rec.terminal(), Some(&Terminal::Stopped(2)));
    }

    #[tokio::test]
    async fn consumer_error_routes_to_on_error() {
        struct Failing;

        #[async_trait]
        impl Subscription for Failing {
            async fn on_start(&mut self, _from: i64) -> Result<()> {
                Ok(())
            }
            async fn on_next(&mut self, _chunk: Chunk) -> Result<bool> {
                Err(Error::Other("consumer blew up".to_string()))
            }
            async fn completed(&mut self, _last: i64) {
                panic!("no terminal after on_error");
            }
            async fn stopped(&mut self, _last: i64) {
                panic!("no terminal after on_error");
            }
            async fn on_error(&mut self, last: i64, _error: &Error) {
                assert_eq!(last, 4);
            }
        }

        let mut sub = Failing;
        let mut delivery = Delivery::new(&mut sub, SortKey::Index, 1);
        assert!(delivery.begin().await);
        assert!(!delivery.feed(chunk(1, 4)).await);
        delivery.complete().await;
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_error() {
        let mut rec = Recorder::new();
        let mut delivery = Delivery::new(&mut rec, SortKey::Position, 3);
        assert!(delivery.begin().await);
        assert!(delivery.feed(chunk(3, 3)).await);
        delivery.fail(Error::Cancelled).await;

        match rec.terminal() {
            Some(Terminal::Failed(3, msg)) => assert!(msg.contains("cancelled")),
            other => panic!("unexpected terminal: {other:?}"),
        }
    }

    #[tokio::test]
    async fn channel_subscription_stops_when_receiver_drops() {
        let (mut sub, rx) = ChannelSubscription::new(4);
        assert!(sub.on_next(chunk(1, 1)).await.unwrap());
        drop(rx);
        assert!(!sub.on_next(chunk(2, 2)).await.unwrap());
    }
}
