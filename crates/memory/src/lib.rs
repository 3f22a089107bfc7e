//! Reference in-memory backend for the chunklog event store
//!
//! This backend defines the behavior of the persistence contract: strict
//! global ordering, hole-free position sequence on the single-append path,
//! and delete-as-flag semantics. It also hosts the latency simulator hook
//! used to exercise ordering and cancellation in tests.

pub mod simulator;
mod store;

pub use simulator::{FixedLatency, LatencySimulator, NoLatency, RandomLatency};
pub use store::{MemoryStore, MemoryStoreOptions};
