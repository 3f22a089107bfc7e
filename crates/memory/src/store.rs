//! In-memory persistence backend
//!
//! Chunks live in a growable slot vector indexed by `position - 1` behind a
//! reader-writer lock; per-partition index and operation maps live in a
//! concurrent map with per-entry locking. The watermark (largest position
//! visible to global reads) only advances over the contiguous prefix of
//! occupied slots, so `read_all` never observes position `k + 1` before `k`.
//!
//! No lock is held across a subscription callback or the latency simulator.

use crate::simulator::{LatencySimulator, NoLatency};
use async_trait::async_trait;
use chunklog_core::chunk::{filler_operation_id, fresh_operation_id};
use chunklog_core::{
    Chunk, Delivery, EMPTY_PARTITION_ID, Error, JobOutcome, JsonCodec, LocalSequence, Payload,
    PayloadCodec, Persistence, Result, SequenceAllocator, SortKey, Subscription, WriteJob,
    WriteOutcome,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const INITIAL_CAPACITY: usize = 64 * 1024;

/// One persisted record, payload in its encoded form
#[derive(Debug, Clone)]
struct StoredChunk {
    position: i64,
    partition_id: String,
    index: i64,
    operation_id: String,
    payload: Vec<u8>,
    deleted: bool,
}

/// A consumed position: either a real chunk or a slot burned by a batch job
/// that collided (the batch path reports duplicates instead of writing
/// fillers, but the watermark must still move past the position).
#[derive(Debug, Clone)]
enum Slot {
    Chunk(StoredChunk),
    Consumed,
}

#[derive(Debug)]
struct Log {
    slots: Vec<Option<Slot>>,
    /// Largest position within the contiguous occupied prefix
    watermark: i64,
}

#[derive(Debug, Default)]
struct PartitionState {
    by_index: BTreeMap<i64, i64>,
    by_operation: HashMap<String, i64>,
}

enum Reservation {
    Reserved,
    DuplicateIndex,
    DuplicateOperation,
}

/// Construction options for [`MemoryStore`]
pub struct MemoryStoreOptions {
    pub codec: Arc<dyn PayloadCodec>,
    pub simulator: Arc<dyn LatencySimulator>,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            codec: Arc::new(JsonCodec),
            simulator: Arc::new(NoLatency),
        }
    }
}

/// Reference in-memory backend
pub struct MemoryStore {
    chunks: RwLock<Log>,
    partitions: DashMap<String, PartitionState>,
    sequence: LocalSequence,
    codec: Arc<dyn PayloadCodec>,
    simulator: Arc<dyn LatencySimulator>,
    /// Encoded null payload, stamped on fillers
    empty_payload: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        match Self::with_options(MemoryStoreOptions::default()) {
            Ok(store) => store,
            Err(_) => unreachable!("default codec encodes a null payload"),
        }
    }

    /// Build a store with a custom codec and/or latency simulator.
    ///
    /// Fails with [`Error::InvalidOptions`] if the codec cannot encode a null
    /// payload, since filler writes depend on it.
    pub fn with_options(options: MemoryStoreOptions) -> Result<Self> {
        let empty_payload = options
            .codec
            .encode(&Payload::Null)
            .map_err(|e| Error::InvalidOptions(format!("codec cannot encode null: {e}")))?;

        Ok(Self {
            chunks: RwLock::new(Log {
                slots: Vec::with_capacity(INITIAL_CAPACITY),
                watermark: 0,
            }),
            partitions: DashMap::new(),
            sequence: LocalSequence::new(0),
            codec: options.codec,
            simulator: options.simulator,
            empty_payload,
        })
    }

    /// Reserve `(index, op_id)` in `partition`, recording the position they
    /// map to. Runs under the partition's entry lock.
    fn try_reserve(&self, partition: &str, index: i64, op_id: &str, position: i64) -> Reservation {
        let mut entry = self.partitions.entry(partition.to_string()).or_default();
        if entry.by_index.contains_key(&index) {
            return Reservation::DuplicateIndex;
        }
        if entry.by_operation.contains_key(op_id) {
            return Reservation::DuplicateOperation;
        }
        entry.by_index.insert(index, position);
        entry.by_operation.insert(op_id.to_string(), position);
        Reservation::Reserved
    }

    /// Occupy the slot for `position` and advance the watermark over the
    /// contiguous occupied prefix.
    fn place(&self, position: i64, slot: Slot) {
        let mut log = self.chunks.write();
        let at = (position - 1) as usize;
        if log.slots.len() <= at {
            log.slots.resize_with(at + 1, || None);
        }
        debug_assert!(log.slots[at].is_none(), "position {position} already occupied");
        log.slots[at] = Some(slot);
        while (log.watermark as usize) < log.slots.len()
            && log.slots[log.watermark as usize].is_some()
        {
            log.watermark += 1;
        }
    }

    /// Write the empty filler reserving `position` after a conflicting append
    fn write_filler(&self, position: i64) {
        tracing::debug!("reserving position {position} with an empty filler");
        self.try_reserve(
            EMPTY_PARTITION_ID,
            position,
            &filler_operation_id(position),
            position,
        );
        self.place(
            position,
            Slot::Chunk(StoredChunk {
                position,
                partition_id: EMPTY_PARTITION_ID.to_string(),
                index: position,
                operation_id: filler_operation_id(position),
                payload: self.empty_payload.clone(),
                deleted: false,
            }),
        );
    }

    fn fetch(&self, position: i64) -> Option<StoredChunk> {
        let log = self.chunks.read();
        match log.slots.get((position - 1) as usize)? {
            Some(Slot::Chunk(stored)) => Some(stored.clone()),
            _ => None,
        }
    }

    fn watermark(&self) -> i64 {
        self.chunks.read().watermark
    }

    fn decode(&self, stored: StoredChunk) -> Result<Chunk> {
        Ok(Chunk {
            position: stored.position,
            partition_id: stored.partition_id,
            index: stored.index,
            operation_id: stored.operation_id,
            payload: self.codec.decode(&stored.payload)?,
            deleted: stored.deleted,
        })
    }

    /// Positions of live chunks in `partition` with index in
    /// `[from_idx, to_idx]`, ascending by index
    fn partition_range(&self, partition: &str, from_idx: i64, to_idx: i64) -> Vec<i64> {
        if from_idx > to_idx {
            return Vec::new();
        }
        match self.partitions.get(partition) {
            Some(entry) => entry
                .by_index
                .range(from_idx..=to_idx)
                .map(|(_, position)| *position)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Deliver the chunks at `positions` in the given order, decoding each
    /// payload and pacing through the latency simulator.
    async fn deliver(
        &self,
        positions: Vec<i64>,
        start: i64,
        key: SortKey,
        limit: u64,
        sub: &mut dyn Subscription,
        ct: &CancellationToken,
    ) -> Result<()> {
        let mut delivery = Delivery::new(sub, key, start);
        if !delivery.begin().await {
            return Ok(());
        }

        let mut delivered: u64 = 0;
        for position in positions {
            if delivered >= limit {
                break;
            }
            if ct.is_cancelled() {
                delivery.fail(Error::Cancelled).await;
                return Ok(());
            }
            self.simulator.wait().await;

            let Some(stored) = self.fetch(position) else {
                continue;
            };
            if stored.deleted {
                continue;
            }
            let chunk = match self.decode(stored) {
                Ok(chunk) => chunk,
                Err(e) => {
                    delivery.fail(e).await;
                    return Ok(());
                }
            };
            delivered += 1;
            if !delivery.feed(chunk).await {
                return Ok(());
            }
        }
        delivery.complete().await;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    fn supports_fillers(&self) -> bool {
        true
    }

    async fn read_forward(
        &self,
        partition: &str,
        from_idx: i64,
        sub: &mut dyn Subscription,
        to_idx: i64,
        limit: u64,
        ct: &CancellationToken,
    ) -> Result<()> {
        let positions = self.partition_range(partition, from_idx, to_idx);
        self.deliver(positions, from_idx, SortKey::Index, limit, sub, ct)
            .await
    }

    async fn read_backward(
        &self,
        partition: &str,
        from_idx: i64,
        sub: &mut dyn Subscription,
        to_idx: i64,
        limit: u64,
        ct: &CancellationToken,
    ) -> Result<()> {
        let mut positions = self.partition_range(partition, to_idx, from_idx);
        positions.reverse();
        self.deliver(positions, from_idx, SortKey::Index, limit, sub, ct)
            .await
    }

    async fn read_single_backward(
        &self,
        partition: &str,
        from_idx: i64,
        ct: &CancellationToken,
    ) -> Result<Option<Chunk>> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.simulator.wait().await;

        let position = match self.partitions.get(partition) {
            Some(entry) => entry
                .by_index
                .range(..=from_idx)
                .next_back()
                .map(|(_, position)| *position),
            None => None,
        };
        match position.and_then(|p| self.fetch(p)) {
            Some(stored) if !stored.deleted => Ok(Some(self.decode(stored)?)),
            _ => Ok(None),
        }
    }

    async fn read_all(
        &self,
        from_pos: i64,
        sub: &mut dyn Subscription,
        limit: u64,
        ct: &CancellationToken,
    ) -> Result<()> {
        let watermark = self.watermark();
        let first = from_pos.max(1);
        let positions: Vec<i64> = (first..=watermark).collect();
        self.deliver(positions, from_pos, SortKey::Position, limit, sub, ct)
            .await
    }

    async fn read_last_position(&self, ct: &CancellationToken) -> Result<i64> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.simulator.wait().await;
        Ok(self.watermark())
    }

    async fn read_by_operation_id(
        &self,
        partition: &str,
        op_id: &str,
        ct: &CancellationToken,
    ) -> Result<Option<Chunk>> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.simulator.wait().await;

        let position = self
            .partitions
            .get(partition)
            .and_then(|entry| entry.by_operation.get(op_id).copied());
        match position.and_then(|p| self.fetch(p)) {
            Some(stored) if !stored.deleted => Ok(Some(self.decode(stored)?)),
            _ => Ok(None),
        }
    }

    async fn read_all_by_operation_id(
        &self,
        op_id: &str,
        sub: &mut dyn Subscription,
        ct: &CancellationToken,
    ) -> Result<()> {
        let watermark = self.watermark();
        let positions: Vec<i64> = (1..=watermark)
            .filter(|position| {
                self.fetch(*position)
                    .is_some_and(|stored| !stored.deleted && stored.operation_id == op_id)
            })
            .collect();
        self.deliver(positions, 0, SortKey::Position, u64::MAX, sub, ct)
            .await
    }

    async fn append(
        &self,
        partition: &str,
        index: i64,
        payload: Payload,
        op_id: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<WriteOutcome> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // Encode before allocating so a codec failure cannot leak a position.
        let encoded = self.codec.encode(&payload)?;

        // The local allocator is authoritative for this store, so the
        // allocated position can never collide with an occupied slot.
        let position = self.sequence.next_ids(1).await?;
        let index = if index < 0 { position } else { index };
        let operation_id = match op_id {
            Some(op) => op.to_string(),
            None => fresh_operation_id(),
        };

        self.simulator.wait().await;

        match self.try_reserve(partition, index, &operation_id, position) {
            Reservation::Reserved => {
                self.place(
                    position,
                    Slot::Chunk(StoredChunk {
                        position,
                        partition_id: partition.to_string(),
                        index,
                        operation_id: operation_id.clone(),
                        payload: encoded,
                        deleted: false,
                    }),
                );
                Ok(WriteOutcome::Persisted(Chunk {
                    position,
                    partition_id: partition.to_string(),
                    index,
                    operation_id,
                    payload,
                    deleted: false,
                }))
            }
            Reservation::DuplicateIndex => {
                self.write_filler(position);
                Ok(WriteOutcome::DuplicateIndex {
                    partition: partition.to_string(),
                    index,
                })
            }
            Reservation::DuplicateOperation => {
                self.write_filler(position);
                Ok(WriteOutcome::DuplicateOperation)
            }
        }
    }

    async fn append_batch(&self, jobs: &mut [WriteJob], ct: &CancellationToken) -> Result<()> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if jobs.is_empty() {
            return Ok(());
        }

        // Encode everything up front; a codec failure leaves every job
        // untouched and no position allocated.
        let mut encoded = Vec::with_capacity(jobs.len());
        for job in jobs.iter() {
            encoded.push(self.codec.encode(&job.payload)?);
        }

        let last = self.sequence.next_ids(jobs.len() as i64).await?;
        let first = last - jobs.len() as i64 + 1;

        self.simulator.wait().await;

        for (at, job) in jobs.iter_mut().enumerate() {
            let position = first + at as i64;
            let index = if job.index < 0 { position } else { job.index };
            let operation_id = match &job.operation_id {
                Some(op) => op.clone(),
                None => fresh_operation_id(),
            };

            match self.try_reserve(&job.partition_id, index, &operation_id, position) {
                Reservation::Reserved => {
                    self.place(
                        position,
                        Slot::Chunk(StoredChunk {
                            position,
                            partition_id: job.partition_id.clone(),
                            index,
                            operation_id: operation_id.clone(),
                            payload: encoded[at].clone(),
                            deleted: false,
                        }),
                    );
                    job.outcome = JobOutcome::Succeeded(Chunk {
                        position,
                        partition_id: job.partition_id.clone(),
                        index,
                        operation_id,
                        payload: job.payload.clone(),
                        deleted: false,
                    });
                }
                Reservation::DuplicateIndex => {
                    self.place(position, Slot::Consumed);
                    job.outcome = JobOutcome::DuplicatedIndex;
                }
                Reservation::DuplicateOperation => {
                    self.place(position, Slot::Consumed);
                    job.outcome = JobOutcome::DuplicatedOperation;
                }
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        partition: &str,
        from_idx: i64,
        to_idx: i64,
        ct: &CancellationToken,
    ) -> Result<()> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.simulator.wait().await;

        let Some(mut entry) = self.partitions.get_mut(partition) else {
            return Err(Error::StreamDeleteFailed {
                partition: partition.to_string(),
            });
        };

        let doomed: Vec<(i64, i64)> = entry
            .by_index
            .range(from_idx..=to_idx)
            .map(|(index, position)| (*index, *position))
            .collect();
        if doomed.is_empty() {
            return Err(Error::StreamDeleteFailed {
                partition: partition.to_string(),
            });
        }

        let mut operations = Vec::with_capacity(doomed.len());
        {
            let mut log = self.chunks.write();
            for (_, position) in &doomed {
                if let Some(Some(Slot::Chunk(stored))) =
                    log.slots.get_mut((*position - 1) as usize)
                {
                    stored.deleted = true;
                    operations.push(stored.operation_id.clone());
                }
            }
        }
        for (index, _) in &doomed {
            entry.by_index.remove(index);
        }
        for operation in &operations {
            entry.by_operation.remove(operation);
        }

        tracing::debug!(
            "deleted {} chunks from partition '{partition}' in [{from_idx}, {to_idx}]",
            doomed.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunklog_core::AUTO_INDEX;
    use chunklog_core::Recorder;
    use chunklog_core::subscription::Terminal;

    fn payload(tag: &str) -> Payload {
        Payload::String(tag.to_string())
    }

    #[tokio::test]
    async fn auto_index_follows_position() {
        let store = MemoryStore::new();
        let ct = CancellationToken::new();

        let outcome = store
            .append("acct", AUTO_INDEX, payload("e1"), Some("op-1"), &ct)
            .await
            .unwrap();
        let chunk = outcome.chunk().expect("persisted");
        assert_eq!(chunk.position, 1);
        assert_eq!(chunk.index, 1);

        let outcome = store
            .append("acct", AUTO_INDEX, payload("e2"), Some("op-2"), &ct)
            .await
            .unwrap();
        assert_eq!(outcome.chunk().unwrap().index, 2);
    }

    #[tokio::test]
    async fn explicit_index_is_respected() {
        let store = MemoryStore::new();
        let ct = CancellationToken::new();

        let outcome = store
            .append("s", 40, payload("x"), Some("op"), &ct)
            .await
            .unwrap();
        let chunk = outcome.chunk().unwrap();
        assert_eq!(chunk.position, 1);
        assert_eq!(chunk.index, 40);
    }

    #[tokio::test]
    async fn watermark_tracks_contiguous_prefix() {
        let store = MemoryStore::new();
        let ct = CancellationToken::new();

        for at in 0..5 {
            store
                .append("p", AUTO_INDEX, payload("e"), Some(&format!("op-{at}")), &ct)
                .await
                .unwrap();
        }
        assert_eq!(store.read_last_position(&ct).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn duplicate_index_burns_position_with_filler() {
        let store = MemoryStore::new();
        let ct = CancellationToken::new();

        store
            .append("s", 5, payload("x"), Some("op-1"), &ct)
            .await
            .unwrap();
        let outcome = store
            .append("s", 5, payload("y"), Some("op-2"), &ct)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::DuplicateIndex {
                partition: "s".to_string(),
                index: 5
            }
        );

        let mut rec = Recorder::new();
        store.read_all(1, &mut rec, u64::MAX, &ct).await.unwrap();
        assert_eq!(rec.positions(), vec![1, 2]);
        assert_eq!(rec.chunks()[1].partition_id, EMPTY_PARTITION_ID);
        assert_eq!(rec.chunks()[1].operation_id, "_2");
        assert_eq!(rec.chunks()[1].payload, Payload::Null);
    }

    #[tokio::test]
    async fn cancelled_append_fails_fast() {
        let store = MemoryStore::new();
        let ct = CancellationToken::new();
        ct.cancel();

        let result = store.append("s", AUTO_INDEX, payload("x"), None, &ct).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(
            store
                .read_last_position(&CancellationToken::new())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn cancelled_read_reports_through_subscription() {
        let store = MemoryStore::new();
        let ct = CancellationToken::new();
        store
            .append("s", AUTO_INDEX, payload("x"), Some("op"), &ct)
            .await
            .unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let mut rec = Recorder::new();
        store
            .read_forward("s", 1, &mut rec, i64::MAX, u64::MAX, &cancelled)
            .await
            .unwrap();
        assert!(matches!(rec.terminal(), Some(Terminal::Failed(1, _))));
    }
}
