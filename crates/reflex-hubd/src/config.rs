//! Hub daemon configuration
//!
//! Loaded once at startup from a YAML file; every field has a default so a
//! missing file yields a working (local-only) hub.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reflex_controller::{BackoffPolicy, ControllerConfig};
use serde::Deserialize;
use tracing::info;

/// Sync backoff tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub initial_backoff_secs: u64,
    pub backoff_step_secs: u64,
    pub backoff_cap_secs: u64,
    pub jitter: f64,
    pub upload_limit_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 90,
            backoff_step_secs: 90,
            backoff_cap_secs: 15 * 60,
            jitter: 0.33,
            upload_limit_bytes: reflex_controller::ControllerConfig::default().upload_limit,
        }
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Place-scoped salt mixed into pin digests
    pub pin_salt: String,

    /// Diagnostics flag: forward everything, evaluate nothing locally
    pub disable_local_processing: bool,

    pub sync: SyncConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("reflex.db"),
            pin_salt: String::new(),
            disable_local_processing: false,
            sync: SyncConfig::default(),
        }
    }
}

impl HubConfig {
    /// Load configuration from a YAML file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the controller configuration
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            disable_local_processing: self.disable_local_processing,
            pin_salt: self.pin_salt.clone(),
            backoff: BackoffPolicy {
                initial: Duration::from_secs(self.sync.initial_backoff_secs),
                step: Duration::from_secs(self.sync.backoff_step_secs),
                jitter: self.sync.jitter,
                cap: Duration::from_secs(self.sync.backoff_cap_secs),
            },
            upload_limit: self.sync.upload_limit_bytes,
            ..ControllerConfig::default()
        }
    }
}
