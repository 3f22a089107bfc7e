//! Shared sequence counter backed by the metadata partition

use async_trait::async_trait;
use chunklog_core::{Error, Result, SequenceAllocator};
use fjall::{Keyspace, PartitionHandle};
use parking_lot::Mutex;
use std::sync::Arc;

/// Counter document allocator: increments are serialized and persisted before
/// the reserved range is handed out, so a crash never re-issues ids. The
/// counter update touches disk, so it runs on the blocking pool.
pub struct SharedSequence {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    keyspace: Keyspace,
    meta: PartitionHandle,
    counter: String,
    persist_mode: fjall::PersistMode,
    lock: Mutex<()>,
}

impl SharedSequence {
    pub fn new(
        keyspace: Keyspace,
        meta: PartitionHandle,
        counter: String,
        persist_mode: fjall::PersistMode,
    ) -> Result<Self> {
        if counter.is_empty() {
            return Err(Error::InvalidOptions(
                "shared sequence counter name is empty".to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(SharedInner {
                keyspace,
                meta,
                counter,
                persist_mode,
                lock: Mutex::new(()),
            }),
        })
    }
}

impl SharedInner {
    fn current(&self) -> Result<i64> {
        match self
            .meta
            .get(self.counter.as_bytes())
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            Some(bytes) => decode_counter(&bytes),
            None => Ok(0),
        }
    }

    fn store(&self, value: i64) -> Result<()> {
        self.meta
            .insert(self.counter.as_bytes(), value.to_le_bytes())
            .map_err(|e| Error::Storage(e.to_string()))?;
        self.keyspace
            .persist(self.persist_mode)
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    fn advance(&self, count: i64) -> Result<i64> {
        let _guard = self.lock.lock();
        let last = self.current()? + count;
        self.store(last)?;
        Ok(last)
    }

    fn ratchet(&self, floor: i64) -> Result<()> {
        let _guard = self.lock.lock();
        if floor > self.current()? {
            self.store(floor)?;
        }
        Ok(())
    }
}

fn decode_counter(bytes: &[u8]) -> Result<i64> {
    if bytes.len() != 8 {
        return Err(Error::Storage(format!(
            "expected 8-byte counter value, got {}",
            bytes.len()
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

#[async_trait]
impl SequenceAllocator for SharedSequence {
    async fn next_ids(&self, count: i64) -> Result<i64> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.advance(count))
            .await
            .map_err(|e| Error::Storage(format!("task join error: {e}")))?
    }

    async fn reload(&self, floor: i64) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.ratchet(floor))
            .await
            .map_err(|e| Error::Storage(format!("task join error: {e}")))?
    }
}
