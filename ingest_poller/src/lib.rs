//! Continuous, pausable consumption of one shard of an offset-addressable
//! log.
//!
//! A [`StreamPoller`] owns the read cursor of a single shard. It pulls
//! batches from a [`ShardConsumer`], skips messages whose pointer is in the
//! [`PersistedPointers`] snapshot it was built with, and hands everything
//! else to a [`MessageProcessor`] in pointer order.
//!
//! [`ShardConsumer`]: ingest_consumer::ShardConsumer
//! [`PersistedPointers`]: ingest_types::PersistedPointers

mod config;
mod error;
mod metrics;
mod poller;
pub mod processor;
mod shared;
mod worker;

pub use config::*;
pub use error::*;
pub use poller::{PollOutcome, StreamPoller};
pub use processor::MessageProcessor;
