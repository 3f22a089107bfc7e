//! The persistence contract every backend implements

use crate::chunk::Chunk;
use crate::codec::Payload;
use crate::error::Result;
use crate::subscription::Subscription;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// No bound on the number of chunks a read delivers
pub const NO_LIMIT: u64 = u64::MAX;

/// Upper index bound covering a whole partition
pub const MAX_INDEX: i64 = i64::MAX;

/// Outcome of a single append
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The chunk was persisted
    Persisted(Chunk),

    /// `(partition, operation_id)` already existed: idempotent no-op. The
    /// allocated position has been reserved by a filler.
    DuplicateOperation,

    /// `(partition, index)` already existed. The allocated position has been
    /// reserved by a filler.
    DuplicateIndex { partition: String, index: i64 },
}

impl WriteOutcome {
    /// The persisted chunk, if the write went through
    pub fn chunk(&self) -> Option<&Chunk> {
        match self {
            WriteOutcome::Persisted(chunk) => Some(chunk),
            _ => None,
        }
    }
}

/// Per-job result inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Not yet attempted (initial state; also left behind when the batch
    /// fails as a whole)
    Pending,

    /// Persisted as the carried chunk
    Succeeded(Chunk),

    /// `(partition, index)` collided with the store or an earlier job
    DuplicatedIndex,

    /// `(partition, operation_id)` collided with the store or an earlier job
    DuplicatedOperation,
}

/// One write inside an `append_batch` call
#[derive(Debug, Clone)]
pub struct WriteJob {
    pub partition_id: String,
    pub index: i64,
    pub payload: Payload,
    pub operation_id: Option<String>,
    pub outcome: JobOutcome,
}

impl WriteJob {
    pub fn new(
        partition_id: impl Into<String>,
        index: i64,
        payload: Payload,
        operation_id: Option<String>,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            index,
            payload,
            operation_id,
            outcome: JobOutcome::Pending,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded(_))
    }
}

/// Durable store of chunks.
///
/// All operations are asynchronous and cancellable. Subscription-driven reads
/// surface cancellation through `on_error(last, Error::Cancelled)`;
/// direct-result operations return `Err(Error::Cancelled)`.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Whether a failed append reserves its position with an empty filler.
    /// Backends answering `false` report the collision without closing the
    /// gap, and global density cannot be assumed.
    fn supports_fillers(&self) -> bool;

    /// Deliver chunks of `partition` with `from_idx <= index <= to_idx`, in
    /// ascending index order, at most `limit` of them.
    async fn read_forward(
        &self,
        partition: &str,
        from_idx: i64,
        sub: &mut dyn Subscription,
        to_idx: i64,
        limit: u64,
        ct: &CancellationToken,
    ) -> Result<()>;

    /// Deliver chunks of `partition` with `to_idx <= index <= from_idx`, in
    /// descending index order, at most `limit` of them.
    async fn read_backward(
        &self,
        partition: &str,
        from_idx: i64,
        sub: &mut dyn Subscription,
        to_idx: i64,
        limit: u64,
        ct: &CancellationToken,
    ) -> Result<()>;

    /// The chunk with the largest index `<= from_idx`, if any
    async fn read_single_backward(
        &self,
        partition: &str,
        from_idx: i64,
        ct: &CancellationToken,
    ) -> Result<Option<Chunk>>;

    /// Deliver chunks of every partition with `position >= from_pos`, in
    /// ascending position order, at most `limit` of them. Fillers are
    /// delivered; consumers filter on [`crate::EMPTY_PARTITION_ID`].
    async fn read_all(
        &self,
        from_pos: i64,
        sub: &mut dyn Subscription,
        limit: u64,
        ct: &CancellationToken,
    ) -> Result<()>;

    /// Largest persisted position (fillers and deleted chunks included), or 0
    async fn read_last_position(&self, ct: &CancellationToken) -> Result<i64>;

    /// The unique chunk of `partition` bearing `op_id`, if any
    async fn read_by_operation_id(
        &self,
        partition: &str,
        op_id: &str,
        ct: &CancellationToken,
    ) -> Result<Option<Chunk>>;

    /// Deliver every chunk bearing `op_id` across all partitions, in
    /// ascending position order.
    async fn read_all_by_operation_id(
        &self,
        op_id: &str,
        sub: &mut dyn Subscription,
        ct: &CancellationToken,
    ) -> Result<()>;

    /// Append one chunk to `partition`.
    ///
    /// A negative `index` requests auto-assignment (`index := position`).
    /// A missing `op_id` gets a fresh unique token. Partition-level
    /// uniqueness violations consume the allocated position (reserved by an
    /// empty filler) and report through [`WriteOutcome`]; every other failure
    /// is an `Err`.
    async fn append(
        &self,
        partition: &str,
        index: i64,
        payload: Payload,
        op_id: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<WriteOutcome>;

    /// Persist a batch of jobs through one allocator call and one bulk
    /// insert. Per-job duplicates are reported on the job outcome, never as
    /// an `Err`; other failures propagate and leave jobs `Pending`. The batch
    /// path does not write fillers.
    async fn append_batch(&self, jobs: &mut [WriteJob], ct: &CancellationToken) -> Result<()>;

    /// Mark every chunk of `partition` with `from_idx <= index <= to_idx` as
    /// deleted. Errors with [`crate::Error::StreamDeleteFailed`] when nothing
    /// matched. Positions are never reused.
    async fn delete(
        &self,
        partition: &str,
        from_idx: i64,
        to_idx: i64,
        ct: &CancellationToken,
    ) -> Result<()>;
}
