//! Geometric setpoint ramping
//!
//! Each tick closes a fixed fraction `g` of the remaining deviation. Once a
//! step would be no larger than the deadband the ramp snaps to the target and
//! stops. The number of moving ticks is bounded analytically by
//! `ceil(ln d / ln(1 - g))`.
//!
//! One ramp covers the whole battery group. Retargeting bumps a generation
//! counter so ticks scheduled for a superseded ramp are ignored.

use crate::config::RampConfig;
use crate::error::{BatmanError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde::{Deserialize, Serialize};

/// Ticks needed to shrink a full-scale deviation below fraction `d`
pub fn step_budget(growth_rate: f64, deadband_fraction: f64) -> u32 {
    (deadband_fraction.ln() / (1.0 - growth_rate).ln()).ceil().max(1.0) as u32
}

/// Outcome of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampTick {
    /// Setpoints to actuate now
    pub setpoints: Vec<i32>,
    /// True once the target is reached; no further ticks are needed
    pub settled: bool,
}

/// Serializable view of the ramp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampState {
    pub actuated: Vec<i32>,
    pub target: Vec<i32>,
    pub steps_taken: u32,
    pub step_budget: u32,
    pub growth_rate: f64,
    pub active: bool,
}

#[derive(Debug)]
pub struct RampController {
    growth_rate: f64,
    deadband_fraction: f64,
    budget: u32,
    actuated: Vec<f64>,
    target: Vec<f64>,
    deadband: Vec<f64>,
    steps: u32,
    generation: u64,
    active: bool,
    logger: StructuredLogger,
}

impl RampController {
    pub fn new(config: &RampConfig) -> Self {
        Self {
            growth_rate: config.growth_rate,
            deadband_fraction: config.deadband_fraction,
            budget: step_budget(config.growth_rate, config.deadband_fraction),
            actuated: Vec::new(),
            target: Vec::new(),
            deadband: Vec::new(),
            steps: 0,
            generation: 0,
            active: false,
            logger: get_logger("ramp"),
        }
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn actuated(&self) -> Vec<i32> {
        round_all(&self.actuated)
    }

    pub fn target(&self) -> Vec<i32> {
        round_all(&self.target)
    }

    /// Record setpoints actuated outside the ramp (e.g. reported at start-up)
    pub fn seed(&mut self, actuated: &[i32]) {
        self.actuated = actuated.iter().map(|&w| f64::from(w)).collect();
    }

    /// Start ramping toward `target` from the current actuated value,
    /// superseding any ramp in flight.
    ///
    /// Returns the generation to tick with, or `None` when the target is
    /// already actuated or already being ramped to.
    pub fn retarget(&mut self, target: &[i32]) -> Option<u64> {
        self.actuated.resize(target.len(), 0.0);
        let target: Vec<f64> = target.iter().map(|&w| f64::from(w)).collect();

        if self.active && round_all(&self.target) == round_all(&target) {
            return None;
        }
        if round_all(&self.actuated) == round_all(&target) {
            self.cancel();
            return None;
        }

        self.deadband = target
            .iter()
            .zip(&self.actuated)
            .map(|(t, a)| self.deadband_fraction * t.abs().max((t - a).abs()))
            .collect();
        self.target = target;
        self.steps = 0;
        self.active = true;
        self.generation += 1;

        self.logger.debug(&format!(
            "Ramp {} from {:?} to {:?}",
            self.generation,
            self.actuated(),
            self.target()
        ));
        Some(self.generation)
    }

    /// Stop any ramp in flight, keeping the actuated value
    pub fn cancel(&mut self) {
        if self.active {
            self.logger
                .debug(&format!("Ramp {} cancelled", self.generation));
        }
        self.active = false;
        self.generation += 1;
    }

    /// Advance the ramp of `generation` by one step.
    ///
    /// Stale generations yield `Ok(None)`. Exceeding the step budget snaps
    /// to the target and returns `RampDivergence`.
    pub fn tick(&mut self, generation: u64) -> Result<Option<RampTick>> {
        if !self.active || generation != self.generation {
            return Ok(None);
        }

        let steps: Vec<f64> = self
            .target
            .iter()
            .zip(&self.actuated)
            .map(|(t, a)| (t - a) * self.growth_rate)
            .collect();
        let moving = steps
            .iter()
            .zip(&self.deadband)
            .any(|(step, band)| step.abs() > *band);

        if !moving {
            self.snap();
            return Ok(Some(RampTick {
                setpoints: self.actuated(),
                settled: true,
            }));
        }

        if self.steps >= self.budget {
            let steps_taken = self.steps;
            self.snap();
            return Err(BatmanError::ramp_divergence(steps_taken + 1, self.budget));
        }

        for ((actuated, step), band) in self.actuated.iter_mut().zip(&steps).zip(&self.deadband) {
            if step.abs() > *band {
                *actuated += step;
            }
        }
        self.steps += 1;
        Ok(Some(RampTick {
            setpoints: self.actuated(),
            settled: false,
        }))
    }

    fn snap(&mut self) {
        self.actuated.clone_from(&self.target);
        self.active = false;
    }

    pub fn state(&self) -> RampState {
        RampState {
            actuated: self.actuated(),
            target: self.target(),
            steps_taken: self.steps,
            step_budget: self.budget,
            growth_rate: self.growth_rate,
            active: self.active,
        }
    }
}

fn round_all(values: &[f64]) -> Vec<i32> {
    values.iter().map(|v| v.round() as i32).collect()
}
