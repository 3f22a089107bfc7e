//! The chunk record and the reserved filler partition

use crate::codec::Payload;
use serde::{Deserialize, Serialize};

/// Partition holding only empty filler chunks. Application code never writes
/// here; `read_all` delivers fillers and consumers filter on this id.
pub const EMPTY_PARTITION_ID: &str = "::empty";

/// Sentinel index requesting auto-assignment (`index := position`)
pub const AUTO_INDEX: i64 = -1;

/// One immutable record in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique, strictly monotonic id across all partitions
    pub position: i64,

    /// Owning partition
    pub partition_id: String,

    /// Per-partition ordinal, unique within the partition
    pub index: i64,

    /// Idempotency key, unique within the partition
    pub operation_id: String,

    /// Deserialized payload; `Null` for fillers
    pub payload: Payload,

    /// Logical-deletion flag. Read paths skip deleted chunks, so delivered
    /// chunks always carry `false`; the flag mirrors the stored record.
    pub deleted: bool,
}

impl Chunk {
    /// Whether this chunk is a filler reserving a position after a write
    /// conflict.
    pub fn is_filler(&self) -> bool {
        self.partition_id == EMPTY_PARTITION_ID
    }
}

/// Operation id stamped on the filler written for a consumed position
pub fn filler_operation_id(position: i64) -> String {
    format!("_{position}")
}

/// Fresh unique operation token for appends that did not supply one
pub fn fresh_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
