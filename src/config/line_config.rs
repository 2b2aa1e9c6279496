//! Line Configuration - all acquisition, routing and alarm tunables as TOML values
//!
//! Each struct implements `Default` with the values the line has been
//! commissioned with, so a missing file or a partial file still yields a
//! runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::plc::RegisterLayout;
use crate::types::{LampPolicy, Recipe};

/// Environment variable pointing at the config file.
pub const CONFIG_ENV_VAR: &str = "LINEGUARD_CONFIG";

/// File name searched in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "line_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one extrusion line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Line identification
    #[serde(default)]
    pub line: LineInfo,

    /// PLC endpoint and register layout
    #[serde(default)]
    pub plc: PlcConfig,

    /// Acquisition loop pacing, counter reset policy and reconnection
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Router batching and overload shedding
    #[serde(default)]
    pub router: RouterConfig,

    /// Line speed and current production labels
    #[serde(default)]
    pub production: ProductionConfig,

    /// Active recipe (alarm limits)
    #[serde(default)]
    pub recipe: Recipe,

    /// Spectrum and statistics tuning
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Event / recipe persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP status server
    #[serde(default)]
    pub server: ServerConfig,
}

impl LineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$LINEGUARD_CONFIG`
    /// 2. `./line_config.toml`
    /// 3. Built-in defaults
    ///
    /// Returns the config together with the file it came from, if any.
    pub fn load() -> (Self, Option<PathBuf>) {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), line = %config.line.name, "Loaded line config from {}", CONFIG_ENV_VAR);
                        return (config, Some(p));
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(line = %config.line.name, "Loaded line config from ./{}", LOCAL_CONFIG_FILE);
                    return (config, Some(local));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        (Self::default(), None)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        for w in &super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate cross-field consistency.
    ///
    /// Rules:
    /// - Router warning depth < critical depth <= acquisition channel capacity
    /// - Batch size, history cap, FFT window and std-dev window must be > 0
    /// - Recipe limits must be finite and non-negative
    /// - The register layout must fit its block without overlapping fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let a = &self.acquisition;
        if a.cycle_ms == 0 {
            errors.push("acquisition.cycle_ms must be > 0".to_string());
        }
        if a.reset_attempts == 0 {
            errors.push("acquisition.reset_attempts must be > 0".to_string());
        }
        if a.channel_capacity == 0 {
            errors.push("acquisition.channel_capacity must be > 0".to_string());
        }
        if a.command_capacity == 0 {
            errors.push("acquisition.command_capacity must be > 0".to_string());
        }

        let r = &self.router;
        if r.batch_size == 0 {
            errors.push("router.batch_size must be > 0".to_string());
        }
        if r.warning_depth >= r.critical_depth {
            errors.push(format!(
                "router.warning_depth ({}) must be less than critical_depth ({})",
                r.warning_depth, r.critical_depth
            ));
        }
        if r.critical_depth > a.channel_capacity {
            errors.push(format!(
                "router.critical_depth ({}) cannot exceed acquisition.channel_capacity ({})",
                r.critical_depth, a.channel_capacity
            ));
        }
        if r.analysis_capacity == 0 {
            errors.push("router.analysis_capacity must be > 0".to_string());
        }
        if r.history_max_samples == 0 {
            errors.push("router.history_max_samples must be > 0".to_string());
        }

        let p = &self.production;
        if !p.speed_m_per_min.is_finite() || p.speed_m_per_min < 0.0 {
            errors.push(format!(
                "production.speed_m_per_min = {} must be a finite, non-negative number",
                p.speed_m_per_min
            ));
        }
        if !(0.0..100.0).contains(&p.speed_fluctuation_percent) {
            errors.push(format!(
                "production.speed_fluctuation_percent = {} must be in [0, 100)",
                p.speed_fluctuation_percent
            ));
        }

        let an = &self.analysis;
        if an.fft_min_samples < 4 {
            errors.push("analysis.fft_min_samples must be >= 4".to_string());
        }
        if an.std_dev_window < 2 {
            errors.push("analysis.std_dev_window must be >= 2".to_string());
        }
        if !an.default_sample_rate_hz.is_finite() || an.default_sample_rate_hz <= 0.0 {
            errors.push("analysis.default_sample_rate_hz must be > 0".to_string());
        }
        if an.min_prominence < 0.0 {
            errors.push("analysis.min_prominence cannot be negative".to_string());
        }

        errors.extend(self.recipe.validate());
        errors.extend(self.plc.layout.validate());

        let (range_errors, range_warnings) = super::validation::validate_physical_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({path}): {err}", path = .0.display(), err = .1)]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({path}): {err}", path = .0.display(), err = .1)]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),

    #[error("Config was not loaded from a file; nothing to reload")]
    NoBackingFile,
}

// ============================================================================
// Sections
// ============================================================================

/// Identification metadata, appears in logs and event records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineInfo {
    #[serde(default = "default_line_name")]
    pub name: String,
}

fn default_line_name() -> String {
    "LINE-1".to_string()
}

impl Default for LineInfo {
    fn default() -> Self {
        Self {
            name: default_line_name(),
        }
    }
}

/// PLC endpoint and data block addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Endpoint string understood by the connector (`sim://<name>` for the emulator)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Data block number holding the register block
    #[serde(default = "default_data_block")]
    pub data_block: u16,

    /// Byte offsets of every field inside the block
    #[serde(default)]
    pub layout: RegisterLayout,
}

fn default_endpoint() -> String {
    "sim://line-1".to_string()
}
fn default_data_block() -> u16 {
    1
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            data_block: default_data_block(),
            layout: RegisterLayout::default(),
        }
    }
}

/// Acquisition loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Target cycle period (ms)
    pub cycle_ms: u64,
    /// Raw counter value above which a hardware reset is issued
    pub counter_high_water: u16,
    /// Consecutive zero-delta cycles before a hardware reset is issued
    pub stable_cycles_before_reset: u32,
    /// Attempts of the assert/clear/verify reset sequence
    pub reset_attempts: u32,
    /// Sleep after a failed connection attempt (ms)
    pub reconnect_backoff_ms: u64,
    /// Consecutive failed connection attempts tolerated before giving up.
    /// `None` retries forever.
    pub max_reconnect_failures: Option<u32>,
    /// Retries of a single read/write the PLC rejected as busy
    pub busy_retries: u32,
    /// Linear backoff step between busy retries (ms)
    pub busy_backoff_ms: u64,
    /// Acquisition → router channel capacity
    pub channel_capacity: usize,
    /// Analysis → acquisition command channel capacity
    pub command_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            cycle_ms: defaults::ACQUISITION_CYCLE_MS,
            counter_high_water: defaults::COUNTER_HIGH_WATER,
            stable_cycles_before_reset: defaults::STABLE_CYCLES_BEFORE_RESET,
            reset_attempts: defaults::COUNTER_RESET_ATTEMPTS,
            reconnect_backoff_ms: defaults::RECONNECT_BACKOFF_MS,
            max_reconnect_failures: None,
            busy_retries: defaults::BUSY_RETRIES,
            busy_backoff_ms: defaults::BUSY_BACKOFF_MS,
            channel_capacity: defaults::ACQUISITION_CHANNEL_CAPACITY,
            command_capacity: defaults::COMMAND_CHANNEL_CAPACITY,
        }
    }
}

/// Router batching and shedding thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Max samples routed per drain cycle
    pub batch_size: usize,
    /// Queue depth above which the oldest samples are shed
    pub critical_depth: usize,
    /// Queue depth shedding brings the backlog down to
    pub warning_depth: usize,
    /// Router → analysis channel capacity
    pub analysis_capacity: usize,
    /// Cap of each display history
    pub history_max_samples: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::ROUTER_BATCH_SIZE,
            critical_depth: defaults::QUEUE_CRITICAL_DEPTH,
            warning_depth: defaults::QUEUE_WARNING_DEPTH,
            analysis_capacity: defaults::ANALYSIS_CHANNEL_CAPACITY,
            history_max_samples: defaults::HISTORY_MAX_SAMPLES,
        }
    }
}

/// Line speed and the labels stamped on every routed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    /// Configured line speed (m/min)
    pub speed_m_per_min: f64,
    /// Uniform random jitter applied to the speed each sample (±percent)
    pub speed_fluctuation_percent: f64,
    /// Current batch label
    pub batch: String,
    /// Current product label
    pub product: String,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            speed_m_per_min: defaults::LINE_SPEED_M_PER_MIN,
            speed_fluctuation_percent: 0.0,
            batch: String::new(),
            product: String::new(),
        }
    }
}

/// Spectrum and statistics tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum buffered diameter samples before a spectrum is computed
    pub fft_min_samples: usize,
    /// Sample rate assumed when it cannot be measured (Hz)
    pub default_sample_rate_hz: f64,
    /// Minimum peak prominence (mm)
    pub min_prominence: f64,
    /// Minimum separation between reported peaks (bins)
    pub min_peak_distance: usize,
    /// Trailing samples per channel for the std-dev alarm
    pub std_dev_window: usize,
    /// How the five alarms drive the common-fault lamp
    pub lamp_policy: LampPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_min_samples: defaults::FFT_MIN_SAMPLES,
            default_sample_rate_hz: defaults::DEFAULT_SAMPLE_RATE_HZ,
            min_prominence: defaults::PEAK_MIN_PROMINENCE,
            min_peak_distance: defaults::PEAK_MIN_DISTANCE_BINS,
            std_dev_window: defaults::STD_DEV_WINDOW,
            lamp_policy: LampPolicy::default(),
        }
    }
}

/// Event / recipe persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Run without a database (offline mode)
    pub enabled: bool,
    /// sled database directory
    pub path: String,
    /// Recipe id to load at startup, if any
    pub recipe_id: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: defaults::DATABASE_PATH.to_string(),
            recipe_id: None,
        }
    }
}

/// HTTP status server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: defaults::SERVER_ADDR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(LineConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config: LineConfig = toml::from_str("").unwrap();
        assert_eq!(config, LineConfig::default());
    }

    #[test]
    fn inverted_shedding_thresholds_are_rejected() {
        let mut config = LineConfig::default();
        config.router.warning_depth = 300;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("warning_depth"));
    }

    #[test]
    fn critical_depth_above_capacity_is_rejected() {
        let mut config = LineConfig::default();
        config.acquisition.channel_capacity = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: LineConfig = toml::from_str(
            r#"
[acquisition]
cycle_ms = 50
max_reconnect_failures = 20
"#,
        )
        .unwrap();
        assert_eq!(config.acquisition.cycle_ms, 50);
        assert_eq!(config.acquisition.max_reconnect_failures, Some(20));
        assert_eq!(
            config.acquisition.counter_high_water,
            defaults::COUNTER_HIGH_WATER
        );
    }

    #[test]
    fn round_trips_through_toml() {
        let config = LineConfig::default();
        let text = config.to_toml().unwrap();
        let back: LineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
