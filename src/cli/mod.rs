//! Command-line interface for arena-executor.
//!
//! Provides the operator-facing `run` and `health` commands and the
//! in-unit `orchestrate` entry point.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
