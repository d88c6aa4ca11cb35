//! Error types and handling for BatMan
//!
//! This module defines the error types used throughout the application.
//! Degraded-input errors (`EmptyPriceSeries`, `InvalidObservation`) never
//! stop the control loop: the manager keeps the last stance and warns.

use thiserror::Error;

/// Result type alias for BatMan operations
pub type Result<T> = std::result::Result<T, BatmanError>;

/// Main error type for BatMan
#[derive(Debug, Error)]
pub enum BatmanError {
    /// No price data is available for the requested day
    #[error("No price data for {day}")]
    EmptyPriceSeries { day: String },

    /// Telemetry is missing or not a usable number
    #[error("Invalid observation: {field} - {message}")]
    InvalidObservation { field: String, message: String },

    /// A ramp exhausted its analytic step budget without converging
    #[error("Ramp diverged: {steps} steps taken, budget was {budget}")]
    RampDivergence { steps: u32, budget: u32 },

    /// The battery (or the grid-target meter) rejected a command
    #[error("Actuation failed for {battery}: {message}")]
    ActuationFailure { battery: String, message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl BatmanError {
    /// Create a new empty-price-series error
    pub fn empty_prices<S: Into<String>>(day: S) -> Self {
        BatmanError::EmptyPriceSeries { day: day.into() }
    }

    /// Create a new invalid-observation error
    pub fn invalid_observation<S: Into<String>>(field: S, message: S) -> Self {
        BatmanError::InvalidObservation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new ramp-divergence error
    pub fn ramp_divergence(steps: u32, budget: u32) -> Self {
        BatmanError::RampDivergence { steps, budget }
    }

    /// Create a new actuation error
    pub fn actuation<S: Into<String>>(battery: S, message: S) -> Self {
        BatmanError::ActuationFailure {
            battery: battery.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BatmanError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        BatmanError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BatmanError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        BatmanError::Network {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        BatmanError::Generic {
            message: message.into(),
        }
    }

    /// Whether this error describes missing or unusable inputs, in which
    /// case the previous stance and setpoint stay in force.
    pub fn is_degraded_input(&self) -> bool {
        matches!(
            self,
            BatmanError::EmptyPriceSeries { .. } | BatmanError::InvalidObservation { .. }
        )
    }
}

impl From<std::io::Error> for BatmanError {
    fn from(err: std::io::Error) -> Self {
        BatmanError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BatmanError {
    fn from(err: serde_yaml::Error) -> Self {
        BatmanError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BatmanError {
    fn from(err: serde_json::Error) -> Self {
        BatmanError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "sessy")]
impl From<reqwest::Error> for BatmanError {
    fn from(err: reqwest::Error) -> Self {
        BatmanError::network(err.to_string())
    }
}

impl From<chrono::ParseError> for BatmanError {
    fn from(err: chrono::ParseError) -> Self {
        BatmanError::validation("datetime".to_string(), err.to_string())
    }
}
