//! Durable backend for the chunklog event store on a fjall keyspace
//!
//! Chunks, the `(partition, index)` and `(partition, operation_id)` secondary
//! indexes, and the sequence counter documents each live in their own
//! keyspace partition. Every append commits all of its rows through a single
//! atomic batch.
//!
//! The sequence counter runs in local mode (atomic, primed from the store at
//! open) or shared mode (a named counter document persisted before ids are
//! handed out).

pub mod config;
pub mod encoding;
pub mod sequence;
mod store;

pub use config::{FjallStoreConfig, SequenceMode};
pub use sequence::SharedSequence;
pub use store::FjallStore;
