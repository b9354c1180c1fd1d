//! Entrypoint of the shard_ingest binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use dotenvy::dotenv;
use trogging::{
    TroggingGuard,
    cli::LoggingConfigBuilderExt,
    tracing_subscriber::{Registry, prelude::*},
};

mod checkpoint;
mod processor;

mod commands {
    pub(crate) mod run;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "shard_ingest",
    about = "Continuously ingest one shard of an offset-addressable log",
    long_about = r#"Continuously ingest one shard of an offset-addressable log

Examples:
    # Ingest a newline-delimited shard file, resuming from a checkpoint
    shard_ingest run --log-file shard.log --output-file out.tsv --checkpoint-file shard.ckpt

    # Replay the whole shard, ignoring the checkpointed position
    shard_ingest run --log-file shard.log --output-file out.tsv --checkpoint-file shard.ckpt --reset-policy earliest

    # Run with full debug logging specified with LOG_FILTER
    LOG_FILTER=debug shard_ingest run --log-file shard.log --output-file out.tsv --checkpoint-file shard.ckpt
"#
)]
struct Config {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Ingest a shard until interrupted
    Run(commands::run::Config),
}

#[tokio::main]
async fn main() {
    #[cfg(unix)]
    install_crash_handler();

    // INGEST_* settings may come from .env, so it is loaded before parsing.
    load_dotenv();

    let config: Config = clap::Parser::parse();

    match config.command {
        None => println!("command required, -h/--help for help"),
        Some(Command::Run(config)) => {
            let _tracing_guard = handle_init_logs(init_logs_and_tracing(&config.logging_config));
            if let Err(e) = commands::run::command(config).await {
                eprintln!("Run command failed: {e}");
                std::process::exit(ReturnCode::Failure as _)
            }
        }
    }
}

fn handle_init_logs(r: Result<TroggingGuard, trogging::Error>) -> TroggingGuard {
    match r {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Initializing logs failed: {e}");
            std::process::exit(ReturnCode::Failure as _);
        }
    }
}

/// Export the variables in `.env`, if present, without overriding ones
/// already set in the environment.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            eprintln!("Failed to load .env file: {e}");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}

/// Print a backtrace to stderr when the process dies on a fatal signal.
#[cfg(unix)]
fn install_crash_handler() {
    unsafe {
        for sig in [libc::SIGSEGV, libc::SIGILL, libc::SIGBUS] {
            set_signal_handler(sig, signal_handler);
        }
    }
}

#[cfg(unix)]
unsafe extern "C" fn signal_handler(sig: i32) {
    let thread = std::thread::current();
    eprintln!(
        "fatal signal {sig} on thread {}\n{:?}",
        thread.name().unwrap_or("<unnamed>"),
        backtrace::Backtrace::new()
    );
    std::process::abort();
}

#[cfg(unix)]
unsafe fn set_signal_handler(signal: libc::c_int, handler: unsafe extern "C" fn(libc::c_int)) {
    use libc::{sigaction, sigfillset, sighandler_t};

    unsafe {
        let mut sigset = std::mem::zeroed();

        // Mask everything while the handler runs.
        if sigfillset(&mut sigset) != -1 {
            let mut action: sigaction = std::mem::zeroed();
            action.sa_mask = sigset;
            action.sa_sigaction = handler as sighandler_t;

            sigaction(signal, &action, std::ptr::null_mut());
        }
    }
}

fn init_logs_and_tracing(
    config: &trogging::cli::LoggingConfig,
) -> Result<TroggingGuard, trogging::Error> {
    let log_layer = trogging::Builder::new()
        .with_default_log_filter("info")
        .with_logging_config(config)
        .build()?;

    let subscriber = Registry::default().with(log_layer);
    trogging::install_global(subscriber)
}
