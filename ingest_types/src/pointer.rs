use std::{
    collections::BTreeSet,
    fmt::{Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// A position within a single shard.
///
/// Pointers are opaque to the poller beyond their total order: pointers
/// yielded by a shard consumer strictly increase along the read order, and the
/// only other thing the poller ever needs is the position immediately after
/// one it has observed.
pub trait ShardPointer: Clone + Ord + Debug + Display + Send + Sync + 'static {
    /// The position immediately following `self`, or [`None`] if `self` is
    /// the last position a shard can hold.
    fn successor(&self) -> Option<Self>;
}

/// An offset into a shard, as used by offset-addressable logs such as Kafka.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(i64);

impl Offset {
    pub const fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl ShardPointer for Offset {
    fn successor(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Offset {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let v = trimmed
            .parse::<i64>()
            .map_err(|e| ParseError::InvalidOffset {
                input: s.to_string(),
                reason: e.to_string(),
            })?;
        if v < 0 {
            return Err(ParseError::InvalidOffset {
                input: s.to_string(),
                reason: "offsets cannot be negative".to_string(),
            });
        }
        Ok(Self(v))
    }
}

/// Identifies one shard (partition) of the ingested stream.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShardId(u32);

impl ShardId {
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single message read from a shard, along with the pointer it was read at.
///
/// Ownership of a [`ReadResult`] passes to the reader; the consumer that
/// produced it keeps no reference to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult<P, M> {
    pointer: P,
    message: M,
}

impl<P, M> ReadResult<P, M> {
    pub fn new(pointer: P, message: M) -> Self {
        Self { pointer, message }
    }

    pub fn pointer(&self) -> &P {
        &self.pointer
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn into_parts(self) -> (P, M) {
        (self.pointer, self.message)
    }
}

/// An immutable snapshot of the pointers that were durably processed before
/// the current poller started.
///
/// Only membership is ever queried; the set is never mutated after
/// construction and can be shared freely between threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedPointers<P> {
    pointers: BTreeSet<P>,
}

impl<P> Default for PersistedPointers<P> {
    fn default() -> Self {
        Self {
            pointers: BTreeSet::new(),
        }
    }
}

impl<P> PersistedPointers<P>
where
    P: Ord,
{
    pub fn new(pointers: impl IntoIterator<Item = P>) -> Self {
        Self {
            pointers: pointers.into_iter().collect(),
        }
    }

    pub fn contains(&self, pointer: &P) -> bool {
        self.pointers.contains(pointer)
    }

    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    /// The greatest pointer in the snapshot, if any.
    pub fn max(&self) -> Option<&P> {
        self.pointers.last()
    }
}

impl<P> FromIterator<P> for PersistedPointers<P>
where
    P: Ord,
{
    fn from_iter<T: IntoIterator<Item = P>>(iter: T) -> Self {
        Self::new(iter)
    }
}
