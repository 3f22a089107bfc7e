//! Poll-driven subscription client
//!
//! Repeatedly calls `read_all(position + 1, ..)` and feeds the results to a
//! wrapped subscription. State machine: `Stopped -> Running -> (Stopping) ->
//! Stopped`. `start` is idempotent; `stop` returns once the poll loop has
//! wound down, handing the subscription back for a later restart.

use async_trait::async_trait;
use chunklog_core::{Chunk, Error, Persistence, Result, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How the poll loop reacts to an error surfaced by a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Transient: log and keep polling
    Continue,
    /// Fatal: stop the loop
    Halt,
}

type ErrorHandler = Arc<dyn Fn(&Error) -> ErrorAction + Send + Sync>;

/// Poll loop configuration
#[derive(Clone)]
pub struct PollingConfig {
    /// Sleep between polls that made no progress
    pub interval: Duration,

    /// Re-poll immediately after a poll that delivered chunks
    pub eager_repoll: bool,

    /// Most chunks delivered per poll
    pub batch_limit: u64,

    /// Maps each surfaced error to an [`ErrorAction`]
    pub on_error: ErrorHandler,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            eager_repoll: true,
            batch_limit: 512,
            on_error: Arc::new(|_| ErrorAction::Continue),
        }
    }
}

type BoxedSubscription = Box<dyn Subscription>;

enum ClientState {
    /// Subscription parked, ready for (re)start. `None` only if the poll
    /// task panicked and took the subscription with it.
    Stopped(Option<BoxedSubscription>),
    Running {
        cancel: CancellationToken,
        task: JoinHandle<BoxedSubscription>,
    },
    Stopping,
}

/// Drives a subscription from the global position sequence
pub struct PollingClient<P> {
    store: Arc<P>,
    config: PollingConfig,
    position: Arc<AtomicI64>,
    state: Mutex<ClientState>,
}

impl<P: Persistence + 'static> PollingClient<P> {
    pub fn new(store: Arc<P>, subscription: impl Subscription + 'static) -> Self {
        Self::with_config(store, subscription, PollingConfig::default())
    }

    pub fn with_config(
        store: Arc<P>,
        subscription: impl Subscription + 'static,
        config: PollingConfig,
    ) -> Self {
        Self {
            store,
            config,
            position: Arc::new(AtomicI64::new(0)),
            state: Mutex::new(ClientState::Stopped(Some(Box::new(subscription)))),
        }
    }

    /// Largest position delivered so far
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), ClientState::Running { .. })
    }

    /// Start the poll loop. Idempotent: a second call while running is a
    /// no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        let subscription = match &mut *state {
            ClientState::Running { .. } | ClientState::Stopping => return Ok(()),
            ClientState::Stopped(parked) => parked.take().ok_or_else(|| {
                Error::Other("subscription was lost by a failed poll loop".to_string())
            })?,
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.store.clone(),
            self.config.clone(),
            self.position.clone(),
            subscription,
            cancel.clone(),
        ));
        *state = ClientState::Running { cancel, task };
        Ok(())
    }

    /// Stop the poll loop and wait for it to wind down
    pub async fn stop(&self) {
        let (cancel, task) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ClientState::Stopping) {
                ClientState::Running { cancel, task } => (cancel, task),
                other => {
                    *state = other;
                    return;
                }
            }
        };

        cancel.cancel();
        let parked = match task.await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::error!("poll loop failed: {e}");
                None
            }
        };
        *self.state.lock() = ClientState::Stopped(parked);
    }

    /// Await `position() >= read_last_position()`: the hook higher-level
    /// runtimes use to block until a projection has seen all writes.
    pub async fn wait_until_caught_up(&self, ct: &CancellationToken) -> Result<()> {
        loop {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let last = self.store.read_last_position(ct).await?;
            if self.position() >= last {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn poll_loop<P: Persistence>(
    store: Arc<P>,
    config: PollingConfig,
    position: Arc<AtomicI64>,
    mut subscription: BoxedSubscription,
    cancel: CancellationToken,
) -> BoxedSubscription {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let from = position.load(Ordering::SeqCst) + 1;
        let mut poll = PollPass {
            inner: subscription.as_mut(),
            handler: &config.on_error,
            highest: 0,
            delivered: 0,
            consumer_stopped: false,
            halt: false,
        };
        let result = store
            .read_all(from, &mut poll, config.batch_limit, &cancel)
            .await;
        let (delivered, highest, consumer_stopped, mut halt) =
            (poll.delivered, poll.highest, poll.consumer_stopped, poll.halt);

        if let Err(e) = result {
            // Positions are never skipped: the failed range is retried on
            // the next pass.
            tracing::warn!("poll from {from} failed: {e}");
            halt |= (config.on_error)(&e) == ErrorAction::Halt;
        }

        if delivered > 0 {
            position.fetch_max(highest, Ordering::SeqCst);
            tracing::trace!("polled {delivered} chunks up to position {highest}");
        }

        if halt || consumer_stopped || cancel.is_cancelled() {
            break;
        }
        if delivered > 0 && config.eager_repoll {
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
    subscription
}

/// Per-poll wrapper: forwards everything to the real subscription while
/// tracking progress and routing errors through the configured handler.
struct PollPass<'a> {
    inner: &'a mut dyn Subscription,
    handler: &'a ErrorHandler,
    highest: i64,
    delivered: u64,
    consumer_stopped: bool,
    halt: bool,
}

#[async_trait]
impl Subscription for PollPass<'_> {
    async fn on_start(&mut self, from: i64) -> Result<()> {
        self.inner.on_start(from).await
    }

    async fn on_next(&mut self, chunk: Chunk) -> Result<bool> {
        let at = chunk.position;
        let proceed = self.inner.on_next(chunk).await?;
        self.highest = self.highest.max(at);
        self.delivered += 1;
        if !proceed {
            self.consumer_stopped = true;
        }
        Ok(proceed)
    }

    async fn completed(&mut self, last: i64) {
        self.inner.completed(last).await;
    }

    async fn stopped(&mut self, last: i64) {
        self.inner.stopped(last).await;
    }

    async fn on_error(&mut self, last: i64, error: &Error) {
        self.inner.on_error(last, error).await;
        tracing::warn!("subscription error at {last}: {error}");
        if (self.handler)(error) == ErrorAction::Halt {
            self.halt = true;
        }
    }
}
