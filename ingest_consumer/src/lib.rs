//! Readers of a single shard of an offset-addressable log.
//!
//! A [`ShardConsumer`] hands out ordered batches of [`ReadResult`] starting
//! at a caller-provided pointer. It is a pure capability: it keeps no cursor of
//! its own, and the reader decides where each read begins.
//!
//! [`ReadResult`]: ingest_types::ReadResult

mod core;
pub mod file;
pub mod mock;

pub use crate::core::*;
