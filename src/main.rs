//! qgov CLI entry point.
//!
//! Loads configuration, initializes logging and delegates to the CLI module.

use quality_governance::{cli, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::parse_cli();
    let config = cli::load_config(&cli)?;

    // Priority: RUST_LOG > --log-level > config file > "info"
    telemetry::init_tracing(&config.logging.level, config.logging.format)?;

    cli::run_with_cli(cli, config).await
}
