//! Store configuration

use chunklog_core::{JsonCodec, PayloadCodec};
use std::path::PathBuf;
use std::sync::Arc;

/// How global positions are allocated
#[derive(Debug, Clone)]
pub enum SequenceMode {
    /// In-process atomic counter primed from the store at open. Fast, but
    /// only safe for a single store handle.
    Local,

    /// Named counter document in the metadata partition, incremented and
    /// persisted before ids are handed out.
    Shared { counter: String },
}

/// Configuration for [`crate::FjallStore`]
#[derive(Clone)]
pub struct FjallStoreConfig {
    /// Directory for the keyspace
    pub data_dir: PathBuf,

    /// Block cache size in bytes
    pub block_cache_size: u64,

    /// Compression for the chunk partition
    pub compression: fjall::CompressionType,

    /// Durability applied after each commit
    pub persist_mode: fjall::PersistMode,

    pub sequence: SequenceMode,

    pub codec: Arc<dyn PayloadCodec>,
}

impl FjallStoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            block_cache_size: 16 * 1024 * 1024,
            compression: fjall::CompressionType::Lz4,
            persist_mode: fjall::PersistMode::Buffer,
            sequence: SequenceMode::Local,
            codec: Arc::new(JsonCodec),
        }
    }

    pub fn with_sequence(mut self, sequence: SequenceMode) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_persist_mode(mut self, mode: fjall::PersistMode) -> Self {
        self.persist_mode = mode;
        self
    }
}
