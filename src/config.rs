//! Configuration management for BatMan
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every section falls back to its defaults so
//! a partial file is enough to get started.

use crate::error::{BatmanError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timezone used to map prices onto local days and slots
    pub timezone: String,

    /// Log commands instead of sending them to the batteries
    pub dry_run: bool,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Price conversion, greed thresholds and slot selection
    pub prices: PricesConfig,

    /// Battery units and their power limits
    pub batteries: BatteriesConfig,

    /// Stance decision tuning
    pub strategy: StrategyConfig,

    /// Setpoint ramp parameters
    pub ramp: RampConfig,

    /// Watchdog debounce and limits
    pub watchdog: WatchdogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level (overrides `level` for console)
    pub console_level: Option<String>,

    /// Optional file-specific level (overrides `level` for file)
    pub file_level: Option<String>,

    /// Path to log file (or directory for rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Surcharges applied to raw feed prices
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriceAdjustConfig {
    /// Supplier mark-up in cents/kWh
    pub hike: f64,

    /// Fixed extra cost in cents/kWh
    pub extra: f64,

    /// Energy tax in cents/kWh
    pub taxes: f64,

    /// VAT multiplier (1.21 = 21%)
    pub btw: f64,
}

/// How greed thresholds are interpreted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GreedMode {
    /// Compare the current price itself against the thresholds
    Absolute,
    /// Compare the distance above the day's minimum against the thresholds
    Relative,
}

/// Greed thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GreedConfig {
    pub mode: GreedMode,

    /// At or below this price (or distance) the stance may go charge-greedy
    pub low: f64,

    /// At or above this price (or distance) the stance may go discharge-greedy
    pub high: f64,
}

/// Price handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricesConfig {
    pub adjust: PriceAdjustConfig,

    pub greed: GreedConfig,

    /// Aggressive trading: allow discharge-greedy overrides
    pub trading: bool,

    /// Hours per selected slot; a day yields `24 / selection_hours`
    /// cheap and expensive slot candidates at any granularity
    pub selection_hours: u32,
}

/// A single battery unit reachable over its local API
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BatteryUnitConfig {
    /// Display name used in logs and errors
    pub name: String,

    /// Base URL of the unit's local API
    pub url: String,

    pub username: String,

    pub password: String,
}

/// Battery bank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteriesConfig {
    /// Units in the bank; the first one carries the P1 grid-target meter
    pub units: Vec<BatteryUnitConfig>,

    /// Usable capacity of one unit in Wh
    pub capacity_wh: f64,

    /// Maximum charge power per unit in W (negative)
    pub max_charge_w: f64,

    /// Maximum discharge power per unit in W (positive)
    pub max_discharge_w: f64,

    /// Nominal duration in hours used by SoC-proportional setpoints
    pub fill_hours: f64,

    /// Charge power per unit while the EV charges (negative, shared service limit)
    pub ev_charge_limit_w: f64,
}

/// Stance decision tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Let the batteries keep serving the house while the EV charges
    pub ev_assist: bool,

    /// Also enable EV assist whenever the current price exceeds Q3
    pub ev_assist_above_q3: bool,

    /// Headroom power (W over one hour) above the reserve needed for a
    /// discharge-greedy override
    pub discharge_floor_w: f64,

    /// PV output below which NOM holds an assistive setpoint
    pub pv_low_output_w: f64,

    /// Assistive setpoint per unit in W while PV output is low
    pub nom_assist_w: f64,
}

/// Setpoint ramp parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Fraction of the remaining deviation closed per step (0..1)
    pub growth_rate: f64,

    /// Convergence tolerance as a fraction of full scale (0..1)
    pub deadband_fraction: f64,

    /// Delay between ramp steps in milliseconds
    pub step_delay_ms: u64,
}

/// Watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Settle time before a watchdog-triggered recompute
    pub debounce_ms: u64,

    /// PV current magnitude treated as overcurrent
    pub pv_overcurrent_a: f64,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "batman_config.yaml",
            "/data/batman_config.yaml",
            "/etc/batman/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parsed timezone
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| BatmanError::validation("timezone".to_string(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.tz()?;

        if self.batteries.units.is_empty() {
            return Err(BatmanError::validation(
                "batteries.units",
                "At least one battery unit is required",
            ));
        }

        if self.batteries.capacity_wh <= 0.0 {
            return Err(BatmanError::validation(
                "batteries.capacity_wh",
                "Must be positive",
            ));
        }

        if self.batteries.max_charge_w >= 0.0 {
            return Err(BatmanError::validation(
                "batteries.max_charge_w",
                "Must be negative (charging draws from the grid)",
            ));
        }

        if self.batteries.max_discharge_w <= 0.0 {
            return Err(BatmanError::validation(
                "batteries.max_discharge_w",
                "Must be positive",
            ));
        }

        if self.batteries.ev_charge_limit_w > 0.0 {
            return Err(BatmanError::validation(
                "batteries.ev_charge_limit_w",
                "Must be zero or negative",
            ));
        }

        if self.batteries.fill_hours <= 0.0 {
            return Err(BatmanError::validation(
                "batteries.fill_hours",
                "Must be positive",
            ));
        }

        if self.prices.selection_hours == 0 || self.prices.selection_hours > 24 {
            return Err(BatmanError::validation(
                "prices.selection_hours",
                "Must be between 1 and 24",
            ));
        }

        if self.prices.greed.low > self.prices.greed.high {
            return Err(BatmanError::validation(
                "prices.greed",
                "low threshold must not exceed high threshold",
            ));
        }

        if !(self.ramp.growth_rate > 0.0 && self.ramp.growth_rate < 1.0) {
            return Err(BatmanError::validation(
                "ramp.growth_rate",
                "Must be between 0 and 1 (exclusive)",
            ));
        }

        if !(self.ramp.deadband_fraction > 0.0 && self.ramp.deadband_fraction < 1.0) {
            return Err(BatmanError::validation(
                "ramp.deadband_fraction",
                "Must be between 0 and 1 (exclusive)",
            ));
        }

        if self.watchdog.debounce_ms == 0 {
            return Err(BatmanError::validation(
                "watchdog.debounce_ms",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}
