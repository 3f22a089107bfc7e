//! Clients riding on top of the persistence contract
//!
//! - [`PollingClient`]: drives a subscription by repeatedly scanning the
//!   global position sequence from the last delivered position
//! - [`PartitionStream`] / [`StreamFactory`]: thin per-partition handles

pub mod polling;
pub mod stream;

pub use polling::{ErrorAction, PollingClient, PollingConfig};
pub use stream::{PartitionStream, StreamFactory};
