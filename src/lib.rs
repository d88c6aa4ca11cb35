//! # BatMan - price-driven home battery stance manager
//!
//! Decides once per price slot (and whenever a watchdog signal settles) how a
//! bank of home batteries should behave, based on the day's electricity
//! prices and live telemetry, and ramps the resulting power setpoints onto
//! the batteries.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `prices`: Price conversion, daily statistics and cheap/expensive slots
//! - `greed`: Price greed classification
//! - `stance`: Precedence-ordered stance decision engine
//! - `setpoint`: Stance to per-battery power targets
//! - `ramp`: Geometric setpoint ramping with a bounded step budget
//! - `watchdog`: Watchdog signal detection and debouncing
//! - `battery`: Command sinks for the battery bank
//! - `manager`: Single-task event loop tying it all together

pub mod battery;
pub mod config;
pub mod error;
pub mod greed;
pub mod logging;
pub mod manager;
pub mod prices;
pub mod ramp;
pub mod setpoint;
pub mod stance;
pub mod watchdog;

// Re-export commonly used types
pub use config::Config;
pub use error::{BatmanError, Result};
pub use manager::{BatteryManager, ManagerHandle};
pub use stance::{Observation, Stance};
