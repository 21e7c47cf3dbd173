//! Server configuration.
//!
//! Loaded from a RON file; every field has a default so a partial file
//! (or none at all) is valid.
//!
//! ```ron
//! (
//!     tick_rate_hz: 20,
//!     regeneration_interval_secs: 60,
//!     rng_seed: 7,
//!     rules: (tactical_plane_size: 5000),
//! )
//! ```

use std::path::Path;

use armada_core::error::EngineError;
use armada_core::rules::EngineRules;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest supported tick rate.
pub const MAX_TICK_RATE_HZ: u32 = 60;

/// Error type for configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found.
    #[error("Config file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// A value is outside its allowed range.
    #[error("Invalid config: {0}")]
    Invalid(String),
    /// Engine rules were rejected.
    #[error(transparent)]
    Rules(#[from] EngineError),
}

/// What periodic regeneration hands each eligible fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenerationRules {
    /// Supplies added.
    pub supplies: u32,
    /// Fuel added.
    pub fuel: u32,
    /// Morale restored.
    pub morale: u8,
}

impl Default for RegenerationRules {
    fn default() -> Self {
        Self {
            supplies: 50,
            fuel: 50,
            morale: 5,
        }
    }
}

/// Runtime configuration shared by every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Scheduler ticks per second (1 to 60).
    pub tick_rate_hz: u32,
    /// Simulated seconds between resource regenerations.
    pub regeneration_interval_secs: u64,
    /// Regeneration amounts.
    pub regeneration: RegenerationRules,
    /// Base seed for per-session RNGs.
    pub rng_seed: u64,
    /// Navigation grid width in cells.
    pub grid_width: u32,
    /// Navigation grid height in cells.
    pub grid_height: u32,
    /// Engine rules.
    pub rules: EngineRules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            regeneration_interval_secs: 300,
            regeneration: RegenerationRules::default(),
            rng_seed: 0,
            grid_width: 100,
            grid_height: 50,
            rules: EngineRules::default(),
        }
    }
}

impl ServerConfig {
    /// Load and validate a config from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Parse and validate a config from a RON string.
    pub fn from_ron_str(ron: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(ron)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TICK_RATE_HZ).contains(&self.tick_rate_hz) {
            return Err(ConfigError::Invalid(format!(
                "tick_rate_hz must be between 1 and {MAX_TICK_RATE_HZ}, got {}",
                self.tick_rate_hz
            )));
        }
        if self.regeneration_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "regeneration_interval_secs must be positive".into(),
            ));
        }
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid must not be empty, got {}x{}",
                self.grid_width, self.grid_height
            )));
        }
        self.rules.validate()?;
        Ok(())
    }

    /// Tick period in simulated milliseconds.
    #[must_use]
    pub fn tick_period_ms(&self) -> u64 {
        1000 / u64::from(self.tick_rate_hz.max(1))
    }

    /// Regeneration interval in simulated milliseconds.
    #[must_use]
    pub fn regeneration_interval_ms(&self) -> u64 {
        self.regeneration_interval_secs.saturating_mul(1000)
    }
}
