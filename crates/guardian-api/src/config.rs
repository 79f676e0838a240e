//! Server configuration.
//!
//! Built once at startup from `GUARDIAN_*` environment variables and passed
//! into the server. Nothing here is read again after boot.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use guardian_autotune::ledger::DEFAULT_SNAPSHOT_INTERVAL;
use guardian_autotune::{AutotuneMode, Baseline};
use guardian_core::{Error, Result};

/// Configuration for the Guardian API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode (pretty logs, in-memory log allowed).
    pub debug: bool,

    /// Directory holding `events.jsonl` and `snapshot.json`.
    ///
    /// When unset the event log lives in memory and is lost on exit.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Events between persisted snapshots; 0 disables snapshots.
    pub snapshot_interval: u64,

    /// Seed for `enabled` before any `autotune.config_updated` event.
    #[serde(default)]
    pub autotune_enabled: Option<bool>,

    /// Seed for `mode` before any `autotune.config_updated` event.
    #[serde(default)]
    pub autotune_mode: Option<AutotuneMode>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            debug: false,
            data_dir: None,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            autotune_enabled: None,
            autotune_mode: None,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Supported variables:
    ///
    /// - `GUARDIAN_HTTP_PORT`
    /// - `GUARDIAN_DEBUG`
    /// - `GUARDIAN_DATA_DIR`
    /// - `GUARDIAN_SNAPSHOT_INTERVAL`
    /// - `GUARDIAN_AUTOTUNE_ENABLED`
    /// - `GUARDIAN_AUTOTUNE_MODE` (`shadow` or `assist`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup` instead of the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a variable is set but malformed.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let mut config = Self::default();

        if let Some(port) = vars.u16("GUARDIAN_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = vars.bool("GUARDIAN_DEBUG")? {
            config.debug = debug;
        }
        config.data_dir = vars.string("GUARDIAN_DATA_DIR").map(PathBuf::from);
        if let Some(interval) = vars.u64("GUARDIAN_SNAPSHOT_INTERVAL")? {
            config.snapshot_interval = interval;
        }
        config.autotune_enabled = vars.bool("GUARDIAN_AUTOTUNE_ENABLED")?;
        if let Some(mode) = vars.string("GUARDIAN_AUTOTUNE_MODE") {
            let parsed = AutotuneMode::parse(&mode).map_err(|e| {
                Error::InvalidInput(format!("GUARDIAN_AUTOTUNE_MODE: {e}"))
            })?;
            config.autotune_mode = Some(parsed);
        }

        Ok(config)
    }

    /// Settings and thresholds in force before the first event.
    #[must_use]
    pub fn baseline(&self) -> Baseline {
        let mut baseline = Baseline::default();
        if let Some(enabled) = self.autotune_enabled {
            baseline.config.enabled = enabled;
        }
        if let Some(mode) = self.autotune_mode {
            baseline.config.mode = mode;
        }
        baseline
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u16(&self, name: &str) -> Result<Option<u16>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u16>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        parse_bool(name, &v).map(Some)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}
