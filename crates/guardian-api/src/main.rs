//! `guardian-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use guardian_api::config::Config;
use guardian_api::server::Server;
use guardian_core::observability::{LogFormat, init_logging};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    if config.data_dir.is_none() && !config.debug {
        anyhow::bail!("GUARDIAN_DATA_DIR is required when GUARDIAN_DEBUG=false");
    }

    let server = Server::open(config).await?;
    server.serve().await?;
    Ok(())
}
