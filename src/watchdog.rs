//! Watchdog signals and debouncing
//!
//! Signals are derived by comparing consecutive observations. Every trigger
//! restarts a single settle timer; only the timer of the latest trigger
//! fires a recompute, so a burst of flapping signals collapses into one.

use crate::config::WatchdogConfig;
use crate::stance::Observation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchdogSignal {
    /// SoC dropped below the required minimum
    MinimumSocBreach,
    /// PV current exceeded the configured magnitude
    PvOvercurrent,
    /// EV started or stopped charging
    EvCharging,
    /// Control was switched on or off
    ControlEnabled,
}

impl fmt::Display for WatchdogSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MinimumSocBreach => "minimum SoC breach",
            Self::PvOvercurrent => "PV overcurrent",
            Self::EvCharging => "EV charging change",
            Self::ControlEnabled => "control toggle",
        };
        f.write_str(name)
    }
}

fn below_minimum(obs: &Observation) -> bool {
    matches!((obs.average_soc(), obs.min_soc), (Some(soc), Some(min)) if soc < min)
}

/// Signals raised by the transition from `prev` to `next`
pub fn detect(prev: &Observation, next: &Observation, config: &WatchdogConfig) -> Vec<WatchdogSignal> {
    let overcurrent = |o: &Observation| o.pv.current_a.abs() > config.pv_overcurrent_a;

    let mut signals = Vec::new();
    if below_minimum(next) && !below_minimum(prev) {
        signals.push(WatchdogSignal::MinimumSocBreach);
    }
    if overcurrent(next) && !overcurrent(prev) {
        signals.push(WatchdogSignal::PvOvercurrent);
    }
    if next.ev_charging != prev.ev_charging {
        signals.push(WatchdogSignal::EvCharging);
    }
    if next.control_enabled != prev.control_enabled {
        signals.push(WatchdogSignal::ControlEnabled);
    }
    signals
}

/// Collapses triggers into one delayed recompute
#[derive(Debug)]
pub struct WatchdogDebouncer {
    delay: Duration,
    generation: u64,
    pending: Vec<WatchdogSignal>,
}

impl WatchdogDebouncer {
    pub fn new(config: &WatchdogConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.debounce_ms),
            generation: 0,
            pending: Vec::new(),
        }
    }

    /// Settle time to wait after a trigger
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Register a signal; returns the generation the settle timer must report
    pub fn trigger(&mut self, signal: WatchdogSignal) -> u64 {
        if !self.pending.contains(&signal) {
            self.pending.push(signal);
        }
        self.generation += 1;
        self.generation
    }

    /// Timer elapsed for `generation`; returns the collected signals when it
    /// is the latest trigger, `None` when a later trigger superseded it
    pub fn fire(&mut self, generation: u64) -> Option<Vec<WatchdogSignal>> {
        if generation != self.generation || self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Drop pending signals; outstanding timers become stale
    pub fn cancel(&mut self) {
        self.pending.clear();
        self.generation += 1;
    }
}
