//! Durable persistence backend
//!
//! fjall's API is synchronous, so every disk-touching step runs inside
//! `tokio::task::spawn_blocking`; the async surface never holds a worker
//! thread across a read, commit, or fsync. Scans collect bounded pages of
//! records on the blocking pool and deliver them on the async side, so no
//! iterator or lock is held across a subscription callback.

use crate::config::{FjallStoreConfig, SequenceMode};
use crate::encoding::{self, Record};
use crate::sequence::SharedSequence;
use async_trait::async_trait;
use chunklog_core::chunk::{filler_operation_id, fresh_operation_id};
use chunklog_core::{
    Chunk, Delivery, EMPTY_PARTITION_ID, Error, JobOutcome, LocalSequence, Payload, PayloadCodec,
    Persistence, Result, SequenceAllocator, SortKey, Subscription, WriteJob, WriteOutcome,
};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bound on the stale-sequence retry loop; exceeding it means the allocator
/// is not converging on the store's tail.
const SEQUENCE_RETRY_LIMIT: u32 = 16;

/// Records fetched per range-scan page
const SCAN_PAGE: usize = 256;

fn storage_err(e: fjall::Error) -> Error {
    Error::Storage(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> Error {
    Error::Storage(format!("task join error: {e}"))
}

fn last_position(chunks: &PartitionHandle) -> Result<i64> {
    match chunks.iter().next_back() {
        Some(entry) => {
            let (key, _) = entry.map_err(storage_err)?;
            encoding::position_from_key(&key)
        }
        None => Ok(0),
    }
}

fn decode_position_value(bytes: &[u8]) -> Result<i64> {
    if bytes.len() != 8 {
        return Err(Error::Storage(format!(
            "expected 8-byte position value, got {}",
            bytes.len()
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(i64::from_be_bytes(buf))
}

enum InsertOutcome {
    Inserted,
    PositionTaken,
    DuplicateIndex,
    DuplicateOperation,
}

/// Blocking-side state, shared with the worker pool through an `Arc`
struct StoreInner {
    keyspace: Keyspace,
    chunks: PartitionHandle,
    by_index: PartitionHandle,
    by_operation: PartitionHandle,
    persist_mode: fjall::PersistMode,
    /// Serializes uniqueness checks with their batch commit
    write_lock: Mutex<()>,
    /// Encoded null payload, stamped on fillers
    empty_payload: Vec<u8>,
    /// Codec tag persisted on every record
    serializer: String,
}

impl StoreInner {
    fn fetch(&self, position: i64) -> Result<Option<Record>> {
        match self
            .chunks
            .get(encoding::position_key(position))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(encoding::decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Live records of `partition` with index in `[from_idx, to_idx]`,
    /// ascending by index, at most `cap` of them
    fn scan_forward(
        &self,
        partition: &str,
        from_idx: i64,
        to_idx: i64,
        cap: usize,
    ) -> Result<Vec<Record>> {
        if from_idx > to_idx {
            return Ok(Vec::new());
        }
        let start = encoding::index_key(partition, from_idx)?;
        let end = encoding::index_key(partition, to_idx)?;
        let mut records = Vec::new();
        for entry in self.by_index.range(start..=end) {
            if records.len() >= cap {
                break;
            }
            let (_, value) = entry.map_err(storage_err)?;
            if let Some(record) = self.fetch(decode_position_value(&value)?)?
                .filter(|record| !record.deleted)
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Same range, descending from `from_idx` (the upper bound)
    fn scan_backward(
        &self,
        partition: &str,
        from_idx: i64,
        to_idx: i64,
        cap: usize,
    ) -> Result<Vec<Record>> {
        if to_idx > from_idx {
            return Ok(Vec::new());
        }
        let start = encoding::index_key(partition, to_idx)?;
        let end = encoding::index_key(partition, from_idx)?;
        let mut records = Vec::new();
        for entry in self.by_index.range(start..=end).rev() {
            if records.len() >= cap {
                break;
            }
            let (_, value) = entry.map_err(storage_err)?;
            if let Some(record) = self.fetch(decode_position_value(&value)?)?
                .filter(|record| !record.deleted)
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// One page of records starting at `from_pos`, deleted rows included
    fn page_from(&self, from_pos: i64, page: usize) -> Result<Vec<Record>> {
        let start = encoding::position_key(from_pos).to_vec();
        let mut records = Vec::with_capacity(page);
        for entry in self.chunks.range(start..).take(page) {
            let (_, value) = entry.map_err(storage_err)?;
            records.push(encoding::decode_record(&value)?);
        }
        Ok(records)
    }

    /// The live record with the largest index `<= from_idx`
    fn floor_record(&self, partition: &str, from_idx: i64) -> Result<Option<Record>> {
        let start = encoding::index_key(partition, i64::MIN)?;
        let end = encoding::index_key(partition, from_idx)?;
        let position = match self.by_index.range(start..=end).next_back() {
            Some(entry) => {
                let (_, value) = entry.map_err(storage_err)?;
                decode_position_value(&value)?
            }
            None => return Ok(None),
        };
        Ok(self.fetch(position)?.filter(|record| !record.deleted))
    }

    /// The live record of `partition` bearing `op_id`
    fn operation_record(&self, partition: &str, op_id: &str) -> Result<Option<Record>> {
        let key = encoding::operation_key(partition, op_id)?;
        let position = match self.by_operation.get(&key).map_err(storage_err)? {
            Some(value) => decode_position_value(&value)?,
            None => return Ok(None),
        };
        Ok(self.fetch(position)?.filter(|record| !record.deleted))
    }

    /// Check-and-commit of one record plus its uniqueness entries
    fn try_insert(&self, record: &Record) -> Result<InsertOutcome> {
        let _guard = self.write_lock.lock();

        let position_key = encoding::position_key(record.position);
        if self
            .chunks
            .get(position_key)
            .map_err(storage_err)?
            .is_some()
        {
            return Ok(InsertOutcome::PositionTaken);
        }
        let index_key = encoding::index_key(&record.partition_id, record.index)?;
        if self.by_index.get(&index_key).map_err(storage_err)?.is_some() {
            return Ok(InsertOutcome::DuplicateIndex);
        }
        let operation_key =
            encoding::operation_key(&record.partition_id, &record.operation_id)?;
        if self
            .by_operation
            .get(&operation_key)
            .map_err(storage_err)?
            .is_some()
        {
            return Ok(InsertOutcome::DuplicateOperation);
        }

        let mut batch = self.keyspace.batch();
        batch.insert(&self.chunks, position_key, encoding::encode_record(record)?);
        batch.insert(&self.by_index, index_key, record.position.to_be_bytes());
        batch.insert(
            &self.by_operation,
            operation_key,
            record.position.to_be_bytes(),
        );
        batch.commit().map_err(storage_err)?;
        self.keyspace
            .persist(self.persist_mode)
            .map_err(storage_err)?;
        Ok(InsertOutcome::Inserted)
    }

    /// Reserve `position` with an empty filler after a conflicting append
    fn insert_filler(&self, position: i64) -> Result<()> {
        tracing::debug!("reserving position {position} with an empty filler");
        let record = Record {
            position,
            partition_id: EMPTY_PARTITION_ID.to_string(),
            index: position,
            operation_id: filler_operation_id(position),
            serializer: self.serializer.clone(),
            deleted: false,
            payload: self.empty_payload.clone(),
        };
        match self.try_insert(&record)? {
            InsertOutcome::Inserted => Ok(()),
            _ => Err(Error::Storage(format!(
                "filler insert conflicted at position {position}"
            ))),
        }
    }

    /// Stage, check, and commit a whole batch. Outcomes are only returned
    /// once the commit has succeeded.
    fn apply_batch(
        &self,
        first: i64,
        jobs: Vec<WriteJob>,
        encoded: Vec<Vec<u8>>,
    ) -> Result<Vec<JobOutcome>> {
        let _guard = self.write_lock.lock();
        let mut staged: Vec<JobOutcome> = Vec::with_capacity(jobs.len());
        let mut batch = self.keyspace.batch();
        let mut batch_indexes: HashSet<Vec<u8>> = HashSet::new();
        let mut batch_operations: HashSet<Vec<u8>> = HashSet::new();

        for (at, job) in jobs.into_iter().enumerate() {
            let position = first + at as i64;
            let index = if job.index < 0 { position } else { job.index };
            let operation_id = match job.operation_id {
                Some(ref op) => op.clone(),
                None => fresh_operation_id(),
            };
            let index_key = encoding::index_key(&job.partition_id, index)?;
            let operation_key = encoding::operation_key(&job.partition_id, &operation_id)?;

            if batch_indexes.contains(&index_key)
                || self.by_index.get(&index_key).map_err(storage_err)?.is_some()
            {
                staged.push(JobOutcome::DuplicatedIndex);
                continue;
            }
            if batch_operations.contains(&operation_key)
                || self
                    .by_operation
                    .get(&operation_key)
                    .map_err(storage_err)?
                    .is_some()
            {
                staged.push(JobOutcome::DuplicatedOperation);
                continue;
            }

            let record = Record {
                position,
                partition_id: job.partition_id.clone(),
                index,
                operation_id: operation_id.clone(),
                serializer: self.serializer.clone(),
                deleted: false,
                payload: encoded[at].clone(),
            };
            batch.insert(
                &self.chunks,
                encoding::position_key(position),
                encoding::encode_record(&record)?,
            );
            batch.insert(&self.by_index, index_key.clone(), position.to_be_bytes());
            batch.insert(
                &self.by_operation,
                operation_key.clone(),
                position.to_be_bytes(),
            );
            batch_indexes.insert(index_key);
            batch_operations.insert(operation_key);

            staged.push(JobOutcome::Succeeded(Chunk {
                position,
                partition_id: job.partition_id,
                index,
                operation_id,
                payload: job.payload,
                deleted: false,
            }));
        }

        batch.commit().map_err(storage_err)?;
        self.keyspace
            .persist(self.persist_mode)
            .map_err(storage_err)?;
        Ok(staged)
    }

    /// Flag the matching range deleted, dropping its uniqueness entries.
    /// Returns how many records were flagged.
    fn delete_range(&self, partition: &str, from_idx: i64, to_idx: i64) -> Result<usize> {
        let _guard = self.write_lock.lock();

        if from_idx > to_idx {
            return Err(Error::StreamDeleteFailed {
                partition: partition.to_string(),
            });
        }
        let start = encoding::index_key(partition, from_idx)?;
        let end = encoding::index_key(partition, to_idx)?;
        let mut positions = Vec::new();
        for entry in self.by_index.range(start..=end) {
            let (_, value) = entry.map_err(storage_err)?;
            positions.push(decode_position_value(&value)?);
        }
        if positions.is_empty() {
            return Err(Error::StreamDeleteFailed {
                partition: partition.to_string(),
            });
        }

        let mut batch = self.keyspace.batch();
        for position in &positions {
            let Some(mut record) = self.fetch(*position)? else {
                continue;
            };
            batch.remove(
                &self.by_index.clone(),
                encoding::index_key(&record.partition_id, record.index)?,
            );
            batch.remove(
                &self.by_operation.clone(),
                encoding::operation_key(&record.partition_id, &record.operation_id)?,
            );
            record.deleted = true;
            batch.insert(
                &self.chunks,
                encoding::position_key(*position),
                encoding::encode_record(&record)?,
            );
        }
        batch.commit().map_err(storage_err)?;
        self.keyspace
            .persist(self.persist_mode)
            .map_err(storage_err)?;
        Ok(positions.len())
    }
}

/// Durable backend on a fjall keyspace
pub struct FjallStore {
    inner: Arc<StoreInner>,
    sequence: Arc<dyn SequenceAllocator>,
    codec: Arc<dyn PayloadCodec>,
}

impl FjallStore {
    /// Open (or create) a store at the configured directory
    pub async fn open(config: FjallStoreConfig) -> Result<Self> {
        if config.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidOptions("data_dir is empty".to_string()));
        }
        let codec = config.codec.clone();
        let empty_payload = codec
            .encode(&Payload::Null)
            .map_err(|e| Error::InvalidOptions(format!("codec cannot encode null: {e}")))?;

        let data_dir = config.data_dir.clone();
        let block_cache_size = config.block_cache_size;
        let compression = config.compression;
        let (keyspace, chunks, by_index, by_operation, meta, last) =
            tokio::task::spawn_blocking(move || {
                std::fs::create_dir_all(&data_dir)?;
                let keyspace = fjall::Config::new(&data_dir)
                    .cache_size(block_cache_size)
                    .open()
                    .map_err(storage_err)?;

                let chunks = keyspace
                    .open_partition(
                        "chunks",
                        PartitionCreateOptions::default()
                            .block_size(64 * 1024)
                            .compression(compression),
                    )
                    .map_err(storage_err)?;
                let by_index = keyspace
                    .open_partition(
                        "partition_index",
                        PartitionCreateOptions::default()
                            .block_size(32 * 1024)
                            .compression(fjall::CompressionType::None),
                    )
                    .map_err(storage_err)?;
                let by_operation = keyspace
                    .open_partition(
                        "partition_ops",
                        PartitionCreateOptions::default()
                            .block_size(32 * 1024)
                            .compression(fjall::CompressionType::None),
                    )
                    .map_err(storage_err)?;
                let meta = keyspace
                    .open_partition(
                        "meta",
                        PartitionCreateOptions::default()
                            .block_size(16 * 1024)
                            .compression(fjall::CompressionType::None),
                    )
                    .map_err(storage_err)?;

                let last = last_position(&chunks)?;
                Ok::<_, Error>((keyspace, chunks, by_index, by_operation, meta, last))
            })
            .await
            .map_err(join_err)??;

        let sequence: Arc<dyn SequenceAllocator> = match &config.sequence {
            SequenceMode::Local => Arc::new(LocalSequence::new(last)),
            SequenceMode::Shared { counter } => Arc::new(SharedSequence::new(
                keyspace.clone(),
                meta,
                counter.clone(),
                config.persist_mode,
            )?),
        };
        // A lost or lagging counter document must never re-issue consumed ids.
        sequence.reload(last).await?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                keyspace,
                chunks,
                by_index,
                by_operation,
                persist_mode: config.persist_mode,
                write_lock: Mutex::new(()),
                empty_payload,
                serializer: codec.name().to_string(),
            }),
            sequence,
            codec,
        })
    }

    /// Run blocking fjall work on the worker pool
    async fn run_blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&StoreInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || work(&inner))
            .await
            .map_err(join_err)?
    }

    fn to_chunk(&self, record: Record) -> Result<Chunk> {
        Ok(Chunk {
            position: record.position,
            partition_id: record.partition_id,
            index: record.index,
            operation_id: record.operation_id,
            payload: self.codec.decode(&record.payload)?,
            deleted: record.deleted,
        })
    }

    /// Deliver pre-fetched records in order
    async fn deliver_records(
        &self,
        records: Vec<Record>,
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
        for record in records {
            if delivered >= limit {
                break;
            }
            if ct.is_cancelled() {
                delivery.fail(Error::Cancelled).await;
                return Ok(());
            }
            let chunk = match self.to_chunk(record) {
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

    /// Paged scan of the global chunk partition, optionally filtered to one
    /// operation id
    async fn scan_deliver(
        &self,
        from_pos: i64,
        start: i64,
        limit: u64,
        operation_filter: Option<&str>,
        sub: &mut dyn Subscription,
        ct: &CancellationToken,
    ) -> Result<()> {
        let mut delivery = Delivery::new(sub, SortKey::Position, start);
        if !delivery.begin().await {
            return Ok(());
        }

        let mut next = from_pos.max(1);
        let mut delivered: u64 = 0;
        'scan: loop {
            if ct.is_cancelled() {
                delivery.fail(Error::Cancelled).await;
                return Ok(());
            }
            let page = match self
                .run_blocking(move |inner| inner.page_from(next, SCAN_PAGE))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    delivery.fail(e).await;
                    return Ok(());
                }
            };
            if page.is_empty() {
                break;
            }
            for record in page {
                next = record.position + 1;
                if delivered >= limit {
                    break 'scan;
                }
                if ct.is_cancelled() {
                    delivery.fail(Error::Cancelled).await;
                    return Ok(());
                }
                if record.deleted {
                    continue;
                }
                if operation_filter.is_some_and(|op| record.operation_id != op) {
                    continue;
                }
                let chunk = match self.to_chunk(record) {
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
        }
        delivery.complete().await;
        Ok(())
    }
}

#[async_trait]
impl Persistence for FjallStore {
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
        let cap = usize::try_from(limit).unwrap_or(usize::MAX);
        let partition = partition.to_string();
        let records = match self
            .run_blocking(move |inner| inner.scan_forward(&partition, from_idx, to_idx, cap))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                let mut delivery = Delivery::new(sub, SortKey::Index, from_idx);
                if delivery.begin().await {
                    delivery.fail(e).await;
                }
                return Ok(());
            }
        };
        self.deliver_records(records, from_idx, SortKey::Index, limit, sub, ct)
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
        let cap = usize::try_from(limit).unwrap_or(usize::MAX);
        let partition = partition.to_string();
        let records = match self
            .run_blocking(move |inner| inner.scan_backward(&partition, from_idx, to_idx, cap))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                let mut delivery = Delivery::new(sub, SortKey::Index, from_idx);
                if delivery.begin().await {
                    delivery.fail(e).await;
                }
                return Ok(());
            }
        };
        self.deliver_records(records, from_idx, SortKey::Index, limit, sub, ct)
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
        let partition = partition.to_string();
        let record = self
            .run_blocking(move |inner| inner.floor_record(&partition, from_idx))
            .await?;
        match record {
            Some(record) => Ok(Some(self.to_chunk(record)?)),
            None => Ok(None),
        }
    }

    async fn read_all(
        &self,
        from_pos: i64,
        sub: &mut dyn Subscription,
        limit: u64,
        ct: &CancellationToken,
    ) -> Result<()> {
        self.scan_deliver(from_pos, from_pos, limit, None, sub, ct)
            .await
    }

    async fn read_last_position(&self, ct: &CancellationToken) -> Result<i64> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.run_blocking(|inner| last_position(&inner.chunks)).await
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
        let partition = partition.to_string();
        let op_id = op_id.to_string();
        let record = self
            .run_blocking(move |inner| inner.operation_record(&partition, &op_id))
            .await?;
        match record {
            Some(record) => Ok(Some(self.to_chunk(record)?)),
            None => Ok(None),
        }
    }

    async fn read_all_by_operation_id(
        &self,
        op_id: &str,
        sub: &mut dyn Subscription,
        ct: &CancellationToken,
    ) -> Result<()> {
        self.scan_deliver(1, 0, u64::MAX, Some(op_id), sub, ct)
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
        let operation_id = match op_id {
            Some(op) => op.to_string(),
            None => fresh_operation_id(),
        };

        let mut attempts: u32 = 0;
        loop {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let position = self.sequence.next_ids(1).await?;
            let index = if index < 0 { position } else { index };
            let record = Record {
                position,
                partition_id: partition.to_string(),
                index,
                operation_id: operation_id.clone(),
                serializer: self.inner.serializer.clone(),
                deleted: false,
                payload: encoded.clone(),
            };

            let outcome = self
                .run_blocking(move |inner| inner.try_insert(&record))
                .await?;
            match outcome {
                InsertOutcome::Inserted => {
                    return Ok(WriteOutcome::Persisted(Chunk {
                        position,
                        partition_id: partition.to_string(),
                        index,
                        operation_id,
                        payload,
                        deleted: false,
                    }));
                }
                InsertOutcome::DuplicateIndex => {
                    self.run_blocking(move |inner| inner.insert_filler(position))
                        .await?;
                    return Ok(WriteOutcome::DuplicateIndex {
                        partition: partition.to_string(),
                        index,
                    });
                }
                InsertOutcome::DuplicateOperation => {
                    self.run_blocking(move |inner| inner.insert_filler(position))
                        .await?;
                    return Ok(WriteOutcome::DuplicateOperation);
                }
                InsertOutcome::PositionTaken => {
                    // Stale local counter: another handle advanced the store.
                    attempts += 1;
                    if attempts >= SEQUENCE_RETRY_LIMIT {
                        return Err(Error::SequenceExhausted { attempts });
                    }
                    tracing::warn!(
                        "position {position} already occupied, reloading sequence (attempt {attempts})"
                    );
                    let last = self
                        .run_blocking(|inner| last_position(&inner.chunks))
                        .await?;
                    self.sequence.reload(last).await?;
                }
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

        let mut encoded = Vec::with_capacity(jobs.len());
        for job in jobs.iter() {
            encoded.push(self.codec.encode(&job.payload)?);
        }

        let last = self.sequence.next_ids(jobs.len() as i64).await?;
        let first = last - jobs.len() as i64 + 1;

        // A failed batch leaves every job in its prior state.
        let snapshot: Vec<WriteJob> = jobs.to_vec();
        let outcomes = self
            .run_blocking(move |inner| inner.apply_batch(first, snapshot, encoded))
            .await?;
        for (job, outcome) in jobs.iter_mut().zip(outcomes) {
            job.outcome = outcome;
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
        let partition_owned = partition.to_string();
        let flagged = self
            .run_blocking(move |inner| inner.delete_range(&partition_owned, from_idx, to_idx))
            .await?;
        tracing::debug!(
            "deleted {flagged} chunks from partition '{partition}' in [{from_idx}, {to_idx}]"
        );
        Ok(())
    }
}
