//! User configuration, read from `<config dir>/sonoscope/config.yaml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::SpectrogramParams;
use crate::audio::types::BackendKind;
use crate::viewport::NavigationMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub spectrogram: SpectrogramParams,
    pub view: ViewConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: BackendKind,
    /// 0.0 to 1.0
    pub volume: f32,
    pub playback_rate: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            volume: 1.0,
            playback_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub mode: NavigationMode,
    /// Initial width of the visible window.
    pub window_seconds: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            mode: NavigationMode::Page,
            window_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on transform workers regardless of core count.
    pub hard_cap: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { hard_cap: 8 }
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("sonoscope")
        .join("config.yaml")
}

/// Load configuration from a YAML file.
///
/// A missing file yields defaults; an unreadable or invalid one logs a
/// warning and also yields defaults.
pub fn load_config(path: &Path) -> AppConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return AppConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "load_config: Loaded config - backend: {}, mode: {}, window: {:.1}s",
                    config.audio.backend.label(),
                    config.view.mode,
                    config.view.window_seconds
                );
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                AppConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using defaults", e);
            AppConfig::default()
        }
    }
}
