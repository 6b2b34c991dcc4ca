//! Command-line interface for the job lifecycle engine.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
