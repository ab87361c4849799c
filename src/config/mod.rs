// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Configuration module

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Historian configuration
    pub historian: HistorianConfig,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Update polling configuration
    pub poller: PollerConfig,

    /// Calculation configuration
    pub calculation: CalculationConfig,

    /// Demo feed configuration
    pub simulator: SimulatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            historian: HistorianConfig::default(),
            cache: CacheConfig::default(),
            poller: PollerConfig::default(),
            calculation: CalculationConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.time_span_secs == 0 {
            bail!("cache.time_span_secs must be greater than zero");
        }
        if self.poller.update_check_interval_ms == 0 {
            bail!("poller.update_check_interval_ms must be greater than zero");
        }
        if self.poller.max_events_per_period == 0 {
            bail!("poller.max_events_per_period must be greater than zero");
        }
        if self.calculation.window_count == 0 {
            bail!("calculation.window_count must be greater than zero");
        }
        if !(self.calculation.k_sigma > 0.0) {
            bail!("calculation.k_sigma must be positive");
        }
        if !(self.calculation.gas_constant > 0.0) {
            bail!("calculation.gas_constant must be positive");
        }
        Ok(())
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("triggercalc"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Historian configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorianConfig {
    /// Database path
    pub path: PathBuf,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/historian.db"),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds of history kept per attribute
    pub time_span_secs: u64,
}

impl CacheConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.time_span_secs as i64)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            time_span_secs: 3600,
        }
    }
}

/// Update polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Interval between update checks in milliseconds
    pub update_check_interval_ms: u64,

    /// Maximum updates accepted per check
    pub max_events_per_period: usize,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.update_check_interval_ms)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            update_check_interval_ms: 5000,
            max_events_per_period: 10000,
        }
    }
}

/// Binding of a calculation input to an attribute name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBinding {
    /// Attribute name within the context
    pub attribute: String,

    /// Whether an update to this attribute triggers the calculation
    #[serde(default)]
    pub trigger: bool,
}

impl InputBinding {
    pub fn new(attribute: &str, trigger: bool) -> Self {
        Self {
            attribute: attribute.to_string(),
            trigger,
        }
    }
}

/// Attribute names of the gas calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasInputs {
    pub temperature: InputBinding,
    pub pressure: InputBinding,
    pub volume: InputBinding,
}

impl Default for GasInputs {
    fn default() -> Self {
        Self {
            temperature: InputBinding::new("Temperature", true),
            pressure: InputBinding::new("Pressure", true),
            volume: InputBinding::new("Volume", false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasOutputs {
    pub moles: String,
    pub molar_flow_rate: String,
}

impl Default for GasOutputs {
    fn default() -> Self {
        Self {
            moles: "Moles".to_string(),
            molar_flow_rate: "MolarFlowRate".to_string(),
        }
    }
}

/// Calculation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// Context (element) names the calculation runs against
    pub contexts: Vec<String>,

    pub inputs: GasInputs,

    pub outputs: GasOutputs,

    /// Samples per statistical window
    pub window_count: usize,

    /// Outlier cutoff in standard deviations
    pub k_sigma: f64,

    /// Gas constant in L*Torr/(K*mol)
    pub gas_constant: f64,
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            contexts: vec!["Sample Element1".to_string(), "Sample Element2".to_string()],
            inputs: GasInputs::default(),
            outputs: GasOutputs::default(),
            window_count: 100,
            k_sigma: 1.75,
            gas_constant: 62.363598221529,
        }
    }
}

/// Demo feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Interval between simulated writes in milliseconds
    pub write_interval_ms: u64,

    /// Probability of an outlier sample
    pub outlier_probability: f64,

    /// Probability of a Bad-quality sample
    pub bad_probability: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            write_interval_ms: 1000,
            outlier_probability: 0.05,
            bad_probability: 0.02,
        }
    }
}
