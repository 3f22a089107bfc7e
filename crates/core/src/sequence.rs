//! Global position allocation

use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of globally unique, monotonic positions.
///
/// `next_ids(count)` reserves `count` contiguous ids and returns the largest;
/// the caller owns `[last - count + 1, last]`. An allocator never hands out
/// the same id twice within a process.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Reserve `count` contiguous ids, returning the last of the range
    async fn next_ids(&self, count: i64) -> Result<i64>;

    /// Ratchet the counter up to at least `floor`. Used after a position
    /// collision reveals the counter is stale.
    async fn reload(&self, floor: i64) -> Result<()>;
}

/// Process-local allocator on an atomic counter.
///
/// Primed from `read_last_position()` at store open. Not safe across
/// processes; durable backends offer a shared mode for that.
pub struct LocalSequence {
    last: AtomicI64,
}

impl LocalSequence {
    pub fn new(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Largest id handed out so far
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SequenceAllocator for LocalSequence {
    async fn next_ids(&self, count: i64) -> Result<i64> {
        Ok(self.last.fetch_add(count, Ordering::SeqCst) + count)
    }

    async fn reload(&self, floor: i64) -> Result<()> {
        self.last.fetch_max(floor, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ranges_are_contiguous() {
        let seq = LocalSequence::new(0);
        assert_eq!(seq.next_ids(1).await.unwrap(), 1);
        assert_eq!(seq.next_ids(3).await.unwrap(), 4);
        assert_eq!(seq.next_ids(1).await.unwrap(), 5);
        assert_eq!(seq.last(), 5);
    }

    #[tokio::test]
    async fn reload_only_ratchets_upward() {
        let seq = LocalSequence::new(10);
        seq.reload(5).await.unwrap();
        assert_eq!(seq.last(), 10);
        seq.reload(20).await.unwrap();
        assert_eq!(seq.next_ids(1).await.unwrap(), 21);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let seq = Arc::new(LocalSequence::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let seq = seq.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..100 {
                    ids.push(seq.next_ids(1).await.unwrap());
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "id {id} allocated twice");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
