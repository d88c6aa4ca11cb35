//! Price greed classification
//!
//! Greed is advisory: it says whether the current price is extreme enough to
//! justify overriding the normal stance. The stance engine decides whether
//! the batteries have the headroom to act on it.

use crate::config::{GreedConfig, GreedMode};
use serde::{Deserialize, Serialize};

/// Greed classification of the current price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Greed {
    /// Price is low enough to charge regardless of schedule
    ChargeGreedy,
    /// Nothing special about the price
    Neutral,
    /// Price is high enough to sell stored energy
    DischargeGreedy,
}

impl Greed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChargeGreedy => "greedy for low price",
            Self::Neutral => "not greedy",
            Self::DischargeGreedy => "greedy for high price",
        }
    }
}

/// Classifies prices against configured thresholds
#[derive(Debug, Clone, Copy)]
pub struct GreedEvaluator {
    thresholds: GreedConfig,
    trading: bool,
}

impl GreedEvaluator {
    /// `trading` permits discharge-greedy classification at all
    pub fn new(thresholds: GreedConfig, trading: bool) -> Self {
        Self {
            thresholds,
            trading,
        }
    }

    /// Classify `price` given the day's minimum price
    pub fn evaluate(&self, price: f64, day_min: f64) -> Greed {
        let value = match self.thresholds.mode {
            GreedMode::Absolute => price,
            GreedMode::Relative => price - day_min,
        };

        if value <= self.thresholds.low {
            Greed::ChargeGreedy
        } else if value >= self.thresholds.high && self.trading {
            Greed::DischargeGreedy
        } else {
            Greed::Neutral
        }
    }
}
