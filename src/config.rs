//! Application configuration and path resolution.
//!
//! `AppConfig` is persisted as `flipbook.json`. Every section has defaults, so
//! a missing file or a partial one is fine.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::retriever::RetrieverSettings;
use crate::error::ConfigError;
use crate::export::calibrate::CalibrationSettings;

pub const CONFIG_FILE: &str = "flipbook.json";
pub const LOG_FILE: &str = "flipbook.log";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (FLIPBOOK_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var("FLIPBOOK_CONFIG_DIR").ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. FLIPBOOK_CONFIG_DIR environment variable
/// 3. Local folder IF flipbook.json or flipbook.log exist there
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/flipbook/{name}
/// - macOS: ~/Library/Application Support/flipbook/{name}
/// - Windows: %APPDATA%\flipbook\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::config_dir()).join(name)
}

/// Get path to a data file (logs), same priority as `config_file` but ending
/// in the platform data directory.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::data_dir()).join(name)
}

/// Create configuration and data directories if missing.
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = resolve_dir(config, dirs_next::config_dir());
    let data_dir = resolve_dir(config, dirs_next::data_dir());

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }
    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    [CONFIG_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn resolve_dir(config: &PathConfig, platform: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Ok(current_dir) = std::env::current_dir()
        && has_local_config_files(&current_dir)
    {
        return current_dir;
    }
    match platform {
        Some(dir) => dir.join("flipbook"),
        None => PathBuf::from("."),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub playback_capacity: usize,
    pub general_capacity: usize,
    /// Frames warmed ahead of the playhead
    pub prefetch_window: usize,
    /// Fraction of available memory the caches may use
    pub mem_fraction: f64,
    /// Memory left to the system (GB)
    pub reserve_gb: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let r = RetrieverSettings::default();
        Self {
            playback_capacity: r.playback_capacity,
            general_capacity: r.general_capacity,
            prefetch_window: r.prefetch_window,
            mem_fraction: 0.5,
            reserve_gb: 1.0,
        }
    }
}

impl CacheConfig {
    pub fn retriever_settings(&self) -> RetrieverSettings {
        RetrieverSettings {
            playback_capacity: self.playback_capacity,
            general_capacity: self.general_capacity,
            prefetch_window: self.prefetch_window,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Encoded frames per second
    pub output_fps: f64,
    /// GIF quantizer speed, 1 (best) to 30 (fastest)
    pub quantize_speed: i32,
    /// Samples composited per batch
    pub chunk_size: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_fps: 10.0,
            quantize_speed: 10,
            chunk_size: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub calibration: CalibrationSettings,
    pub export: ExportSettings,
    /// Worker threads, None = 3/4 of the cores
    pub workers: Option<usize>,
}

impl AppConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(io_err)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("test.json", &config), PathBuf::from("/custom/test.json"));
        assert_eq!(data_file("flipbook.log", &config), PathBuf::from("/custom/flipbook.log"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from/cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from/cli")));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.cache.playback_capacity, 10);
        assert_eq!(config.cache.general_capacity, 50);
        assert_eq!(config.calibration.max_rounds, 3);
        assert_eq!(config.export.output_fps, 10.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = AppConfig::default();
        config.workers = Some(2);
        config.calibration.shrink = 0.2;
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "cache": { "playback_capacity": 4 } }"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.cache.playback_capacity, 4);
        assert_eq!(config.cache.general_capacity, 50);
        assert_eq!(config.export, ExportSettings::default());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
