//! The checkpoint file: one persisted [`Offset`] per line.

use std::path::{Path, PathBuf};

use ingest_types::{Offset, PersistedPointers, ShardPointer};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum CheckpointError {
    #[error("failed to read checkpoint file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid checkpoint on line {line} of {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        source: ingest_types::ParseError,
    },

    #[error("checkpoint {checkpoint} is the last offset a shard can hold, nothing can follow it")]
    Exhausted { checkpoint: Offset },
}

/// Load every offset recorded in the checkpoint file at `path`.
///
/// A missing file has no checkpoints. Blank lines are ignored.
pub(crate) async fn load(path: &Path) -> Result<PersistedPointers<Offset>, CheckpointError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Default::default()),
        Err(source) => {
            return Err(CheckpointError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    contents
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(idx, l)| {
            l.parse::<Offset>().map_err(|source| CheckpointError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}

/// The offset to resume reading from: one past the highest checkpoint.
pub(crate) fn resume_offset(
    persisted: &PersistedPointers<Offset>,
) -> Result<Offset, CheckpointError> {
    match persisted.max() {
        Some(max) => max
            .successor()
            .ok_or(CheckpointError::Exhausted { checkpoint: *max }),
        None => Ok(Offset::new(0)),
    }
}
