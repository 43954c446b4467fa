//! Command-line interface for qgov.
//!
//! Provides the server and worker processes plus operator commands for
//! migrations, offline scoring, the dead-letter queue, records and config.

mod commands;
mod runtime;

pub use commands::{load_config, parse_cli, run, run_with_cli, Cli, Commands};
pub use runtime::{Backends, JobRunner};
