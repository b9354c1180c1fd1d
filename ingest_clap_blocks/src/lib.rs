//! Building blocks for [`clap`]-driven configuration options.

pub mod poller;
