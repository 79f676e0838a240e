//! Guardian CLI - offline maintenance for event logs.
//!
//! The main entry point for the `guardian` CLI binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guardian_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::ValidateReplay(args) => {
                guardian_cli::commands::validate_replay::execute(&args, &config).await
            }
            Commands::Migrate(args) => guardian_cli::commands::migrate::execute(args, &config).await,
            Commands::Consistency(args) => {
                guardian_cli::commands::consistency::execute(&args, &config).await
            }
        }
    })
}
