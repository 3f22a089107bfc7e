//! Core contract for the chunklog event store
//!
//! This crate defines:
//! - The immutable [`Chunk`] record and the reserved filler partition
//! - The pluggable [`PayloadCodec`] invoked on every write and read
//! - The [`SequenceAllocator`] that hands out global positions
//! - The [`Subscription`] push protocol and its delivery driver
//! - The [`Persistence`] trait every backend implements

pub mod chunk;
pub mod codec;
pub mod error;
pub mod persistence;
pub mod sequence;
pub mod subscription;

pub use chunk::{AUTO_INDEX, Chunk, EMPTY_PARTITION_ID};
pub use codec::{JsonCodec, Payload, PayloadCodec};
pub use error::{Error, Result};
pub use persistence::{JobOutcome, MAX_INDEX, NO_LIMIT, Persistence, WriteJob, WriteOutcome};
pub use sequence::{LocalSequence, SequenceAllocator};
pub use subscription::{ChannelSubscription, ChunkStream, Delivery, Recorder, SortKey, Subscription};
