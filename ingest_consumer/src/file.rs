//! A shard backed by a newline-delimited file.
//!
//! Line `n` (zero based) of the file is the message at [`Offset`] `n`. Only
//! newline-terminated lines are visible to readers, so a writer appending to
//! the file is never observed mid-line.
//!
//! The file is treated as append-only: a reader indexes where each line
//! starts and only scans bytes appended since the last read.

use std::{io::SeekFrom, path::PathBuf, time::Duration};

use async_trait::async_trait;
use ingest_types::{MaxMessages, Offset, ReadResult, ShardId};
use observability_deps::tracing::*;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    time::Instant,
};

use crate::core::{ConsumerError, ConsumerErrorKind, ReadBatch, ShardConsumer};

/// How often a caught-up reader re-checks the file for appended lines.
pub const DEFAULT_FILE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Byte positions of the complete lines seen so far.
#[derive(Debug, Default)]
struct LineIndex {
    /// Offset of the first byte of each complete line.
    starts: Vec<u64>,

    /// Offset one past the last newline indexed.
    end: u64,
}

impl LineIndex {
    fn len(&self) -> usize {
        self.starts.len()
    }

    /// Index the newlines in `tail`, the bytes that follow [`LineIndex::end`].
    fn extend(&mut self, tail: &[u8]) {
        let base = self.end;
        for (idx, _) in tail.iter().enumerate().filter(|(_, b)| **b == b'\n') {
            self.starts.push(self.end);
            self.end = base + idx as u64 + 1;
        }
    }

    /// The byte range holding lines `start..start + limit`, clamped to the
    /// indexed lines.
    fn byte_range(&self, start: usize, limit: usize) -> Option<(u64, u64)> {
        let from = *self.starts.get(start)?;
        let stop = start.saturating_add(limit);
        let to = self.starts.get(stop).copied().unwrap_or(self.end);
        Some((from, to))
    }
}

/// A [`ShardConsumer`] tailing a newline-delimited file.
#[derive(Debug)]
pub struct FileShardConsumer {
    path: PathBuf,
    shard_id: ShardId,
    poll_interval: Duration,
    index: LineIndex,
    closed: bool,
}

impl FileShardConsumer {
    pub fn new(path: impl Into<PathBuf>, shard_id: ShardId) -> Self {
        Self {
            path: path.into(),
            shard_id,
            poll_interval: DEFAULT_FILE_POLL_INTERVAL,
            index: LineIndex::default(),
            closed: false,
        }
    }

    /// Override [`DEFAULT_FILE_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Open the file and index any lines completed since the last call.
    ///
    /// Returns [`None`] for a missing file, which is an empty shard.
    async fn open_indexed(&mut self) -> Result<Option<File>, ConsumerError> {
        let mut file = match File::open(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.index = LineIndex::default();
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if len < self.index.end {
            warn!(
                path=%self.path.display(),
                shard_id=%self.shard_id,
                indexed_bytes=self.index.end,
                file_bytes=len,
                "shard file shrank - re-indexing from the start"
            );
            self.index = LineIndex::default();
        }

        if len > self.index.end {
            file.seek(SeekFrom::Start(self.index.end)).await?;
            let mut tail = Vec::new();
            file.read_to_end(&mut tail).await?;
            self.index.extend(&tail);
        }

        Ok(Some(file))
    }

    /// Read up to `limit` complete lines starting at line `start`.
    async fn read_lines(
        &mut self,
        start: usize,
        limit: usize,
    ) -> Result<Vec<String>, ConsumerError> {
        let Some(mut file) = self.open_indexed().await? else {
            return Ok(vec![]);
        };
        let Some((from, to)) = self.index.byte_range(start, limit) else {
            return Ok(vec![]);
        };

        file.seek(SeekFrom::Start(from)).await?;
        let mut buf = vec![0; (to - from) as usize];
        file.read_exact(&mut buf).await?;

        let text = std::str::from_utf8(&buf).map_err(|e| ConsumerError::invalid_data(e))?;
        Ok(text
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect())
    }

    fn check_open(&self) -> Result<(), ConsumerError> {
        if self.closed {
            return Err(ConsumerError::closed());
        }
        Ok(())
    }
}

#[async_trait]
impl ShardConsumer for FileShardConsumer {
    type Pointer = Offset;
    type Message = String;

    async fn read_next(
        &mut self,
        pointer: &Offset,
        max_messages: MaxMessages,
        timeout: Duration,
    ) -> Result<ReadBatch<Offset, String>, ConsumerError> {
        self.check_open()?;

        let start = usize::try_from(pointer.get()).map_err(|_| {
            ConsumerError::new(
                ConsumerErrorKind::PointerOutOfRange,
                format!("offset {pointer} is negative"),
            )
        })?;
        let limit = max_messages.limit().unwrap_or(usize::MAX);
        let deadline = Instant::now() + timeout;

        loop {
            let batch: ReadBatch<_, _> = self
                .read_lines(start, limit)
                .await?
                .into_iter()
                .zip(start..)
                .map(|(line, idx)| ReadResult::new(Offset::new(idx as i64), line))
                .collect();

            if !batch.is_empty() {
                trace!(
                    path=%self.path.display(),
                    shard_id=%self.shard_id,
                    %pointer,
                    batch_size=batch.len(),
                    "read lines from shard file"
                );
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConsumerError::timeout(timeout));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn earliest_pointer(&mut self) -> Result<Offset, ConsumerError> {
        self.check_open()?;
        Ok(Offset::new(0))
    }

    async fn latest_pointer(&mut self) -> Result<Offset, ConsumerError> {
        self.check_open()?;
        self.open_indexed().await?;
        Ok(Offset::new(self.index.len() as i64))
    }

    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        if !self.closed {
            debug!(path=%self.path.display(), shard_id=%self.shard_id, "closing file shard consumer");
            self.closed = true;
        }
        Ok(())
    }
}
