//! Per-partition stream handles
//!
//! Thin adapters over the persistence contract: all real work happens in the
//! backend. Handles are value-typed and the factory caches nothing.

use chunklog_core::{
    AUTO_INDEX, Error, MAX_INDEX, NO_LIMIT, Payload, Persistence, Result, Subscription,
    WriteOutcome,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A named partition bound to a backend
pub struct PartitionStream<P> {
    partition_id: String,
    store: Arc<P>,
    read_only: bool,
}

impl<P> Clone for PartitionStream<P> {
    fn clone(&self) -> Self {
        Self {
            partition_id: self.partition_id.clone(),
            store: self.store.clone(),
            read_only: self.read_only,
        }
    }
}

impl<P: Persistence> PartitionStream<P> {
    pub fn id(&self) -> &str {
        &self.partition_id
    }

    pub fn is_writable(&self) -> bool {
        !self.read_only
    }

    /// Append with an auto-assigned index
    pub async fn append(
        &self,
        payload: Payload,
        op_id: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<WriteOutcome> {
        self.append_at(AUTO_INDEX, payload, op_id, ct).await
    }

    /// Append at a caller-chosen index
    pub async fn append_at(
        &self,
        index: i64,
        payload: Payload,
        op_id: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<WriteOutcome> {
        if self.read_only {
            return Err(Error::ReadOnlyStream {
                partition: self.partition_id.clone(),
            });
        }
        self.store
            .append(&self.partition_id, index, payload, op_id, ct)
            .await
    }

    /// Deliver the partition's chunks with index in `[from_idx, to_idx]`,
    /// ascending
    pub async fn read(
        &self,
        sub: &mut dyn Subscription,
        from_idx: i64,
        to_idx: i64,
        ct: &CancellationToken,
    ) -> Result<()> {
        self.store
            .read_forward(&self.partition_id, from_idx, sub, to_idx, NO_LIMIT, ct)
            .await
    }

    /// Deliver every chunk of the partition, ascending by index
    pub async fn read_all(&self, sub: &mut dyn Subscription, ct: &CancellationToken) -> Result<()> {
        self.read(sub, 0, MAX_INDEX, ct).await
    }

    /// Mark the whole partition deleted
    pub async fn delete(&self, ct: &CancellationToken) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyStream {
                partition: self.partition_id.clone(),
            });
        }
        self.store
            .delete(&self.partition_id, i64::MIN, i64::MAX, ct)
            .await
    }
}

/// Creates partition stream handles. Stateless: every call builds a fresh
/// value-typed handle.
pub struct StreamFactory<P> {
    store: Arc<P>,
}

impl<P> Clone for StreamFactory<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<P: Persistence> StreamFactory<P> {
    pub fn new(store: Arc<P>) -> Self {
        Self { store }
    }

    pub fn open(&self, partition_id: impl Into<String>) -> PartitionStream<P> {
        PartitionStream {
            partition_id: partition_id.into(),
            store: self.store.clone(),
            read_only: false,
        }
    }

    pub fn open_read_only(&self, partition_id: impl Into<String>) -> PartitionStream<P> {
        PartitionStream {
            partition_id: partition_id.into(),
            store: self.store.clone(),
            read_only: true,
        }
    }
}
