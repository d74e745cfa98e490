//! Command-line interface for judge-queue.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
