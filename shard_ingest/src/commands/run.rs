//! Implementation of command line option for running shard ingest

use std::{path::PathBuf, sync::Arc, time::Duration};

use ingest_clap_blocks::poller::PollerCliConfig;
use ingest_consumer::file::FileShardConsumer;
use ingest_poller::{
    PollerError, StreamPoller, processor::instrumentation::ProcessorInstrumentation,
};
use ingest_types::ShardId;
use observability_deps::tracing::*;
use thiserror::Error;
use trogging::cli::LoggingConfig;

use crate::{
    checkpoint::{self, CheckpointError},
    processor::FileAppendProcessor,
};

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("failed to load checkpoints: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to open output file {}: {source}", path.display())]
    OpenOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start poller: {0}")]
    Start(#[source] PollerError),

    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),

    #[error("shard ingest halted: {0}")]
    Halted(#[source] Arc<PollerError>),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type FilePoller =
    StreamPoller<FileShardConsumer, ProcessorInstrumentation<FileAppendProcessor>>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    /// poller options
    #[clap(flatten)]
    pub(crate) poller_config: PollerCliConfig,

    /// The shard to ingest: a newline-delimited file where line N is the
    /// message at offset N.
    #[clap(long = "log-file", env = "INGEST_LOG_FILE", action)]
    pub(crate) log_file: PathBuf,

    /// File each ingested message is appended to, prefixed by its offset.
    #[clap(long = "output-file", env = "INGEST_OUTPUT_FILE", action)]
    pub(crate) output_file: PathBuf,

    /// File recording the offset of every ingested message, one per line.
    ///
    /// Offsets listed here are never ingested again, and ingest resumes
    /// after the highest one.
    #[clap(long = "checkpoint-file", env = "INGEST_CHECKPOINT_FILE", action)]
    pub(crate) checkpoint_file: PathBuf,

    /// Identifier of the shard, used in logs and metrics.
    #[clap(long = "shard-id", env = "INGEST_SHARD_ID", default_value = "0", action)]
    pub(crate) shard_id: u32,

    /// How often to check the log file for new lines once caught up.
    #[clap(
        long = "file-poll-interval",
        env = "INGEST_FILE_POLL_INTERVAL",
        default_value = "100ms",
        value_parser = humantime::parse_duration
    )]
    pub(crate) file_poll_interval: Duration,
}

/// Build the poller described by `config`, resuming from its checkpoint file.
pub(crate) async fn build_poller(config: &Config, metrics: &metric::Registry) -> Result<FilePoller> {
    let persisted = checkpoint::load(&config.checkpoint_file).await?;
    let start = checkpoint::resume_offset(&persisted)?;

    let shard_id = ShardId::new(config.shard_id);
    let consumer = FileShardConsumer::new(&config.log_file, shard_id)
        .with_poll_interval(config.file_poll_interval);

    let processor = FileAppendProcessor::open(&config.output_file, &config.checkpoint_file)
        .await
        .map_err(|source| Error::OpenOutput {
            path: config.output_file.clone(),
            source,
        })?;
    let processor = ProcessorInstrumentation::new("file_append", processor, metrics);

    info!(
        shard_id=%shard_id,
        log_file=%config.log_file.display(),
        checkpoints=persisted.len(),
        %start,
        "loaded shard checkpoints"
    );

    Ok(StreamPoller::new(
        start,
        persisted,
        consumer,
        processor,
        config.poller_config.poller_config(),
        metrics,
    ))
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let metrics = metric::Registry::default();
    let poller = build_poller(&config, &metrics).await?;

    poller.start().await.map_err(Error::Start)?;

    let signal = tokio::select! {
        res = wait_for_signal() => res,
        _ = poller.wait_for_stop() => Ok(()),
    };

    poller.close().await;
    signal.map_err(Error::Signal)?;

    if let Some(e) = poller.failure() {
        return Err(Error::Halted(e));
    }

    info!(
        shard_id=%poller.shard_id(),
        batch_start=%poller.batch_start_pointer(),
        "shard ingest stopped"
    );
    Ok(())
}

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received SIGINT");
    Ok(())
}
