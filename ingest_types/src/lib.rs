//! Shared value types for pull-based shard ingestion.
//!
//! A shard of an external, offset-addressable log is consumed one batch at a
//! time. Every message in a shard is addressed by a [`ShardPointer`], which is
//! totally ordered within that shard. The types in this crate are the common
//! vocabulary between a shard consumer, the poller driving it, and whatever
//! tracks durable progress.

mod pointer;
mod policy;
mod state;

pub use pointer::{Offset, PersistedPointers, ReadResult, ShardId, ShardPointer};
pub use policy::{MaxMessages, ResetPolicy};
pub use state::PollerState;

use thiserror::Error;

/// Errors parsing the textual form of the types in this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid offset {input:?}: {reason}")]
    InvalidOffset { input: String, reason: String },

    #[error("invalid reset policy {0:?}, expected one of: none, earliest, latest")]
    InvalidResetPolicy(String),
}
