use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::Profile;
use crate::transfer::TransferOptions;

/// Ceiling profiles the queue switches between (`[queue]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Profile applied at startup, on `faster()` and on `reset()`.
    pub fast: Profile,
    /// Profile applied on `slower()`, e.g. while a game is running.
    pub slow: Profile,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fast: Profile {
                downloads: 3,
                extractions: 3,
            },
            slow: Profile {
                downloads: 0,
                extractions: 0,
            },
        }
    }
}

/// Transport and sampling parameters for every transfer (`[transfer]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// How often the speed sampler emits a progress sample.
    pub sample_interval_ms: u64,
    /// Number of recent samples averaged into `current_average`.
    pub sample_window: usize,
    pub connect_timeout_secs: u64,
    /// Abort if throughput stays below this many bytes/s for `low_speed_time_secs`.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    pub max_redirections: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            sample_window: 5,
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            max_redirections: 10,
        }
    }
}

impl TransferConfig {
    /// Transfer options carrying these transport settings (no overwrite, no decompression).
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            sample_interval: Duration::from_millis(self.sample_interval_ms.max(1)),
            sample_window: self.sample_window.max(1),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            low_speed_limit: self.low_speed_limit,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs),
            max_redirections: self.max_redirections,
            ..TransferOptions::default()
        }
    }
}

/// Global configuration loaded from `~/.config/voodoo/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoodooConfig {
    pub queue: QueueConfig,
    pub transfer: TransferConfig,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("voodoo")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VoodooConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VoodooConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg: VoodooConfig =
        toml::from_str(&data).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
