use std::{fmt::Display, num::NonZeroUsize, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Upper bound on the number of messages returned by a single shard read.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxMessages {
    /// Return everything available in one read.
    #[default]
    Unlimited,

    /// Return at most this many messages.
    Limit(NonZeroUsize),
}

impl MaxMessages {
    /// Build a bound from a plain count, treating `0` as [`MaxMessages::Unlimited`].
    pub fn from_count(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(Self::Unlimited, Self::Limit)
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unlimited => None,
            Self::Limit(n) => Some(n.get()),
        }
    }
}

impl Display for MaxMessages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Limit(n) => write!(f, "{n}"),
        }
    }
}

/// Selects where a poller starts reading, independently of any checkpointed
/// position it was given.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Start at the supplied pointer (resume from checkpoint).
    #[default]
    None,

    /// Start at the lowest pointer still retained by the shard.
    Earliest,

    /// Start at the end of the shard, skipping all existing backlog.
    Latest,
}

impl Display for ResetPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        };
        f.write_str(s)
    }
}

impl FromStr for ResetPolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            _ => Err(ParseError::InvalidResetPolicy(s.to_string())),
        }
    }
}
