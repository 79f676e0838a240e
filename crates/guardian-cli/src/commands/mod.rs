//! CLI command implementations.

pub mod consistency;
pub mod migrate;
pub mod validate_replay;

use std::path::Path;

use anyhow::{Context, Result};
use guardian_core::repository::EVENT_LOG_FILE;

/// Reads the raw event log under `data_dir`, treating a missing file as empty.
pub(crate) async fn read_log(data_dir: &Path) -> Result<String> {
    let path = data_dir.join(EVENT_LOG_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}
