//! Configuration management for mirror-dma.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`MIRROR_DMA_MAX_BURST`, `MIRROR_DMA_SCRATCH_ROWS`)
//! 2. Project-local config file (`./mirror-dma.toml`)
//! 3. User config file (`~/.config/mirror-dma/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # mirror-dma.toml
//!
//! [engine]
//! max_burst_beats = 64
//! scratch_rows = 2        # 0 stages the whole matrix
//!
//! [bus]
//! read_latency_cycles = 8
//! write_response_cycles = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::device::bus::BusTiming;
use crate::device::dma::{EngineConfig, ScratchGranularity};

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

pub const ENV_MAX_BURST: &str = "MIRROR_DMA_MAX_BURST";
pub const ENV_SCRATCH_ROWS: &str = "MIRROR_DMA_SCRATCH_ROWS";

/// Errors reading an explicitly named config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// `[engine]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Beats per burst cap (1-256)
    pub max_burst_beats: Option<u16>,

    /// Scratch window in source rows; 0 means the whole matrix
    pub scratch_rows: Option<usize>,
}

/// `[bus]` section: wait states of the memory responder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub request_wait_cycles: Option<u32>,
    pub read_latency_cycles: Option<u32>,
    pub beat_gap_cycles: Option<u32>,
    pub write_response_cycles: Option<u32>,
}

/// mirror-dma configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSection,
    pub bus: BusSection,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `mirror-dma.toml`
    /// 3. User config `~/.config/mirror-dma/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Engine tunables with defaults filled in.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let scratch = match self.engine.scratch_rows {
            Some(0) => ScratchGranularity::WholeMatrix,
            Some(rows) => ScratchGranularity::Rows(rows),
            None => defaults.scratch,
        };

        EngineConfig {
            max_burst_beats: self.engine.max_burst_beats.unwrap_or(defaults.max_burst_beats),
            scratch,
        }
        .normalized()
    }

    /// Responder wait states with defaults filled in.
    pub fn bus_timing(&self) -> BusTiming {
        let defaults = BusTiming::default();
        BusTiming {
            request_wait_cycles: self.bus.request_wait_cycles.unwrap_or(defaults.request_wait_cycles),
            read_latency_cycles: self.bus.read_latency_cycles.unwrap_or(defaults.read_latency_cycles),
            beat_gap_cycles: self.bus.beat_gap_cycles.unwrap_or(defaults.beat_gap_cycles),
            write_response_cycles: self.bus.write_response_cycles.unwrap_or(defaults.write_response_cycles),
        }
    }

    /// Load user configuration from ~/.config/mirror-dma/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./mirror-dma.toml
    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("mirror-dma.toml"))
    }

    /// Load configuration from a specific file, logging and skipping
    /// unreadable ones.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match Self::from_file(path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    /// Read and parse one config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    pub fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.engine.max_burst_beats, other.engine.max_burst_beats);
        take(&mut self.engine.scratch_rows, other.engine.scratch_rows);
        take(&mut self.bus.request_wait_cycles, other.bus.request_wait_cycles);
        take(&mut self.bus.read_latency_cycles, other.bus.read_latency_cycles);
        take(&mut self.bus.beat_gap_cycles, other.bus.beat_gap_cycles);
        take(&mut self.bus.write_response_cycles, other.bus.write_response_cycles);
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup. Unparseable values are ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_BURST) {
            match value.trim().parse::<u16>() {
                Ok(beats) => {
                    log::info!("Using {} from environment: {}", ENV_MAX_BURST, beats);
                    self.engine.max_burst_beats = Some(beats);
                }
                Err(e) => log::warn!("Ignoring {}={:?}: {}", ENV_MAX_BURST, value, e),
            }
        }
        if let Some(value) = lookup(ENV_SCRATCH_ROWS) {
            match value.trim().parse::<usize>() {
                Ok(rows) => {
                    log::info!("Using {} from environment: {}", ENV_SCRATCH_ROWS, rows);
                    self.engine.scratch_rows = Some(rows);
                }
                Err(e) => log::warn!("Ignoring {}={:?}: {}", ENV_SCRATCH_ROWS, value, e),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mirror-dma").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# mirror-dma configuration
# Place this file at ~/.config/mirror-dma/config.toml or ./mirror-dma.toml

[engine]
# Upper bound on beats per bus burst (1-256)
max_burst_beats = 256

# Scratch buffer window in source rows (0 = stage the whole matrix)
scratch_rows = 2

[bus]
# Idle cycles before the responder takes a new request after a burst
request_wait_cycles = 1

# Idle cycles between a read request and its first data beat
read_latency_cycles = 4

# Idle cycles between consecutive data beats
beat_gap_cycles = 0

# Idle cycles between the last write beat and the write response
write_response_cycles = 2
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine_config(), EngineConfig::default());
        assert_eq!(config.bus_timing(), BusTiming::default());
    }

    #[test]
    fn test_config_merge() {
        let mut base: Config = toml::from_str(
            "[engine]\nmax_burst_beats = 16\nscratch_rows = 4\n[bus]\nbeat_gap_cycles = 1\n",
        )
        .unwrap();
        let overlay: Config = toml::from_str("[engine]\nscratch_rows = 3\n").unwrap();

        base.merge(overlay);

        // max_burst_beats unchanged (overlay was None)
        assert_eq!(base.engine.max_burst_beats, Some(16));
        assert_eq!(base.engine.scratch_rows, Some(3));
        assert_eq!(base.bus.beat_gap_cycles, Some(1));
    }

    #[test]
    fn test_scratch_rows_zero_is_whole_matrix() {
        let config: Config = toml::from_str("[engine]\nscratch_rows = 0\n").unwrap();
        assert_eq!(config.engine_config().scratch, ScratchGranularity::WholeMatrix);
    }

    #[test]
    fn test_out_of_range_burst_is_clamped() {
        let config: Config = toml::from_str("[engine]\nmax_burst_beats = 1000\n").unwrap();
        assert_eq!(config.engine_config().max_burst_beats, 256);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(ENV_MAX_BURST, "32"), (ENV_SCRATCH_ROWS, "not-a-number")]
            .into_iter()
            .collect();

        let mut config: Config = toml::from_str("[engine]\nscratch_rows = 5\n").unwrap();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.engine.max_burst_beats, Some(32));
        // Bad value leaves the file setting in place
        assert_eq!(config.engine.scratch_rows, Some(5));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.engine_config(), EngineConfig::default());
        assert_eq!(config.bus_timing(), BusTiming::default());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/mirror-dma.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
