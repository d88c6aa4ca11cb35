//! Stance to power target mapping
//!
//! Targets are signed watts per battery unit: negative charges, positive
//! discharges. The bank is actuated through one grid target on the P1
//! meter, which is the sign-inverted sum of the per-unit targets.

use crate::config::Config;
use crate::error::{BatmanError, Result};
use crate::stance::{Observation, Stance};
use serde::{Deserialize, Serialize};

/// Per-unit targets plus the combined grid target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetpointTargets {
    pub per_battery: Vec<i32>,
    pub grid_target: i32,
}

impl SetpointTargets {
    pub fn new(per_battery: Vec<i32>) -> Self {
        let grid_target = grid_target(&per_battery);
        Self {
            per_battery,
            grid_target,
        }
    }
}

/// Sign-inverted aggregate of per-unit targets
pub fn grid_target(per_battery: &[i32]) -> i32 {
    -per_battery.iter().sum::<i32>()
}

#[derive(Debug, Clone)]
pub struct SetpointCalculator {
    units: usize,
    capacity_wh: f64,
    max_charge_w: f64,
    max_discharge_w: f64,
    fill_hours: f64,
    ev_charge_limit_w: f64,
    pv_low_output_w: f64,
    nom_assist_w: f64,
}

impl SetpointCalculator {
    pub fn new(config: &Config) -> Self {
        let b = &config.batteries;
        Self {
            units: b.units.len(),
            capacity_wh: b.capacity_wh,
            max_charge_w: b.max_charge_w,
            max_discharge_w: b.max_discharge_w,
            fill_hours: b.fill_hours,
            ev_charge_limit_w: b.ev_charge_limit_w,
            pv_low_output_w: config.strategy.pv_low_output_w,
            nom_assist_w: config.strategy.nom_assist_w,
        }
    }

    /// Charge target for one unit; `max` of two negatives keeps the smaller draw
    pub fn charge_target(&self, soc: f64, ev_charging: bool) -> f64 {
        let fill = -(100.0 - soc).max(0.0) / 100.0 * self.capacity_wh / self.fill_hours;
        let target = self.max_charge_w.max(fill);
        if ev_charging {
            target.max(self.ev_charge_limit_w)
        } else {
            target
        }
    }

    /// Discharge target for one unit, driving toward the reserve
    pub fn discharge_target(&self, soc: f64, min_soc: f64) -> f64 {
        let drain = (soc - min_soc) / 100.0 * self.capacity_wh / self.fill_hours;
        self.max_discharge_w.min(drain).max(0.0)
    }

    /// NOM target; a producing but weak PV array gets a small assist
    pub fn nom_target(&self, pv_power_w: f64) -> f64 {
        if pv_power_w > 0.0 && pv_power_w < self.pv_low_output_w {
            self.nom_assist_w
        } else {
            0.0
        }
    }

    /// Per-unit SoC; a unit that is not reported or reports garbage takes the
    /// bank average
    fn unit_socs(&self, obs: &Observation) -> Result<Vec<f64>> {
        let average = obs.average_soc().filter(|s| s.is_finite());
        (0..self.units)
            .map(|i| {
                let reading = obs.battery_soc.get(i).copied();
                reading
                    .filter(|s| s.is_finite())
                    .or(average)
                    .ok_or_else(|| {
                        let reason = match reading {
                            Some(v) => format!("{} is not a percentage", v),
                            None => "missing".to_string(),
                        };
                        BatmanError::invalid_observation(format!("battery_soc[{}]", i), reason)
                    })
            })
            .collect()
    }

    /// Targets for `stance`; `None` means no setpoint is issued
    pub fn compute(&self, stance: Stance, obs: &Observation) -> Result<Option<SetpointTargets>> {
        let per_unit: Vec<f64> = match stance {
            Stance::Idle => return Ok(None),
            Stance::Nom => vec![self.nom_target(obs.pv.power_w); self.units],
            Stance::Charge => self
                .unit_socs(obs)?
                .into_iter()
                .map(|soc| self.charge_target(soc, obs.ev_charging))
                .collect(),
            Stance::Discharge => {
                let min_soc = obs.min_soc.filter(|m| m.is_finite()).ok_or_else(|| {
                    BatmanError::invalid_observation("min_soc", "missing")
                })?;
                self.unit_socs(obs)?
                    .into_iter()
                    .map(|soc| self.discharge_target(soc, min_soc))
                    .collect()
            }
        };

        Ok(Some(SetpointTargets::new(
            per_unit.into_iter().map(|w| w.round() as i32).collect(),
        )))
    }
}
