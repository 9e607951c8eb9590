//! Command-line interface for msa-worker.
//!
//! Provides the long-running worker, a one-shot job runner, an enqueue
//! helper for operators and a configuration check.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
