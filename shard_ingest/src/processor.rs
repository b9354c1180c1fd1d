//! A [`MessageProcessor`] appending messages to a file.

use std::path::Path;

use async_trait::async_trait;
use ingest_poller::MessageProcessor;
use ingest_types::Offset;
use observability_deps::tracing::*;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

#[derive(Debug)]
struct Files {
    output: File,
    checkpoint: File,
}

/// Appends `offset<TAB>message` lines to an output file, then records the
/// offset in the checkpoint file so it is skipped after a restart.
///
/// A crash between the two writes leaves a message in the output that is
/// not checkpointed, and so is written again by the next run.
#[derive(Debug)]
pub(crate) struct FileAppendProcessor {
    files: Mutex<Files>,
}

impl FileAppendProcessor {
    pub(crate) async fn open(output: &Path, checkpoint: &Path) -> std::io::Result<Self> {
        let output = append(output).await?;
        let checkpoint = append(checkpoint).await?;

        Ok(Self {
            files: Mutex::new(Files { output, checkpoint }),
        })
    }
}

async fn append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

#[async_trait]
impl MessageProcessor<Offset, String> for FileAppendProcessor {
    type Error = std::io::Error;

    async fn process(&self, pointer: &Offset, message: &String) -> Result<(), Self::Error> {
        let mut files = self.files.lock().await;

        files
            .output
            .write_all(format!("{pointer}\t{message}\n").as_bytes())
            .await?;
        files.output.flush().await?;

        files
            .checkpoint
            .write_all(format!("{pointer}\n").as_bytes())
            .await?;
        files.checkpoint.sync_data().await?;

        trace!(%pointer, "appended message to output file");
        Ok(())
    }
}
