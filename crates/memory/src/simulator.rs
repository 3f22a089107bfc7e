//! Deterministic latency injection for the in-memory backend
//!
//! The store awaits [`LatencySimulator::wait`] before every observable step:
//! before a write becomes visible and before each chunk is delivered to a
//! subscription. The default is a no-op; the reference simulators introduce
//! fixed or random delays to shake out ordering and cancellation bugs.

use async_trait::async_trait;
use std::time::Duration;

/// Injection point for simulated network latency
#[async_trait]
pub trait LatencySimulator: Send + Sync {
    async fn wait(&self);
}

/// Production default: no delay
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLatency;

#[async_trait]
impl LatencySimulator for NoLatency {
    async fn wait(&self) {}
}

/// Constant delay before every observable step
#[derive(Debug, Clone, Copy)]
pub struct FixedLatency {
    delay: Duration,
}

impl FixedLatency {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl LatencySimulator for FixedLatency {
    async fn wait(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

/// Uniformly random delay within `[min, max]`
#[derive(Debug, Clone, Copy)]
pub struct RandomLatency {
    min_ms: u64,
    max_ms: u64,
}

impl RandomLatency {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min_ms: min.as_millis() as u64,
            max_ms: max.as_millis() as u64,
        }
    }
}

#[async_trait]
impl LatencySimulator for RandomLatency {
    async fn wait(&self) {
        use rand::Rng;
        let delay = rand::rng().random_range(self.min_ms..=self.max_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
