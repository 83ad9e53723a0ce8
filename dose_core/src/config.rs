//! Configuration file support for pedidose.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/pedidose/config.toml`.

use crate::engine::{CalculationSettings, DEFAULT_MAX_WEIGHT_KG, DEFAULT_PRECISION};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest precision accepted from configuration
pub const MAX_PRECISION: usize = 6;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub calculation: CalculationConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

/// Calculation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// Decimal places for display volumes and dose strings
    #[serde(default = "default_precision")]
    pub precision: usize,

    /// Single maximum weight (kg) shared by input checks and the engine
    #[serde(default = "default_max_weight_kg")]
    pub max_weight_kg: f64,
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            precision: default_precision(),
            max_weight_kg: default_max_weight_kg(),
        }
    }
}

/// Export destination configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

// Default value functions
fn default_precision() -> usize {
    DEFAULT_PRECISION
}

fn default_max_weight_kg() -> f64 {
    DEFAULT_MAX_WEIGHT_KG
}

fn default_output_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pedidose")
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pedidose")
            .join("config.toml")
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let calc = &self.calculation;
        if calc.precision > MAX_PRECISION {
            return Err(Error::Config(format!(
                "precision {} exceeds maximum of {}",
                calc.precision, MAX_PRECISION
            )));
        }
        if !(calc.max_weight_kg.is_finite() && calc.max_weight_kg > 0.0) {
            return Err(Error::Config(format!(
                "max_weight_kg must be a positive number, got {}",
                calc.max_weight_kg
            )));
        }
        Ok(())
    }

    /// Engine settings derived from this configuration
    pub fn calculation_settings(&self) -> CalculationSettings {
        CalculationSettings {
            precision: self.calculation.precision,
            max_weight_kg: self.calculation.max_weight_kg,
        }
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
