use super::{BatteryManager, ManagerEvent, ManagerSnapshot};
use crate::error::BatmanError;
use crate::logging::{LogContext, get_logger_with_context};
use crate::prices::PriceProfile;
use crate::setpoint;
use crate::stance::{DecisionInput, StanceReason};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Duration;

impl BatteryManager {
    /// Rebuild the profile when it is missing or belongs to another day
    pub(super) fn ensure_profile(&mut self, now: DateTime<Utc>) {
        let today = self.local_day(now);
        if self.profile.as_ref().is_some_and(|p| p.day == today) {
            return;
        }
        self.prune_prices(now);
        self.profile = None;

        let Some(points) = self.prices.get(&today) else {
            return;
        };
        match PriceProfile::build(today, points.clone(), self.config.prices.selection_hours) {
            Ok(profile) => {
                self.logger.info(&format!(
                    "Price profile for {}: {} | cheap {:?} | expensive {:?}",
                    today,
                    profile.stats.summary(),
                    profile.cheap_slots,
                    profile.expensive_slots
                ));
                self.profile = Some(profile);
            }
            Err(e) => self
                .logger
                .warn(&format!("Cannot build price profile: {}", e)),
        }
    }

    /// Current price, if the last tick falls in the same slot as `now`
    fn price_now(&self, now: DateTime<Utc>) -> Option<f64> {
        let profile = self.profile.as_ref()?;
        let (at, price) = self.current_price?;
        let slot = profile.slot_at(now)?;
        (profile.slot_at(at) == Some(slot)).then_some(price)
    }

    /// Run one decision cycle: stance, setpoints, ramp and actuation
    pub async fn recompute(&mut self, now: DateTime<Utc>) {
        self.cycles += 1;
        self.ensure_profile(now);

        let Some(observation) = self.observation.clone() else {
            self.degrade(BatmanError::invalid_observation(
                "observation",
                "no telemetry received yet",
            ));
            return;
        };

        let verdict = self.engine.evaluate(
            self.state,
            &DecisionInput {
                observation: &observation,
                profile: self.profile.as_ref(),
                now,
                price: self.price_now(now),
            },
        );

        let rule = match verdict.reason {
            StanceReason::ControlDisabled => {
                self.ramp.cancel();
                self.last_reason = "control disabled".to_string();
                self.degraded = None;
                self.publish("control disabled; holding");
                return;
            }
            StanceReason::Degraded(e) => {
                self.degrade(e);
                return;
            }
            StanceReason::Rule(rule) => rule,
        };

        // Setpoint inputs are checked before anything changes or is sent
        let stance = verdict.state.current;
        let targets = match self.setpoints.compute(stance, &observation) {
            Ok(targets) => targets,
            Err(e) => {
                self.degrade(e);
                return;
            }
        };

        self.state = verdict.state;
        self.last_reason = rule.to_string();
        self.last_greed = verdict.greed.map(|g| g.as_str().to_string());
        self.degraded = None;

        if self.commanded != Some(stance) {
            if self.state.previous != stance {
                self.logger.info(&format!(
                    "Stance {} -> {} ({})",
                    self.state.previous, stance, self.last_reason
                ));
            }
            self.command_stance().await;
        }

        match targets {
            None => {
                self.ramp.cancel();
                self.targets = None;
            }
            Some(targets) => {
                let generation = self.ramp.retarget(&targets.per_battery);
                self.targets = Some(targets);
                if let Some(generation) = generation {
                    self.ramp_tick(generation).await;
                }
            }
        }

        let target = match &self.targets {
            Some(t) => format!("target {:?}, grid {} W", t.per_battery, t.grid_target),
            None => "no setpoint".to_string(),
        };
        self.publish(&format!(
            "{} ({}) | {} | {}",
            stance,
            self.last_reason,
            self.last_greed.as_deref().unwrap_or("-"),
            target
        ));
    }

    fn degrade(&mut self, err: BatmanError) {
        if err.is_degraded_input() {
            self.logger
                .warn(&format!("Keeping stance {}: {}", self.state.current, err));
        } else {
            self.logger.error(&format!("Decision cycle failed: {}", err));
        }
        self.degraded = Some(err.to_string());
        self.publish(&format!("{} (degraded: {})", self.state.current, err));
    }

    /// Advance the ramp and actuate the step
    pub(super) async fn ramp_tick(&mut self, generation: u64) {
        match self.ramp.tick(generation) {
            Ok(None) => {}
            Ok(Some(tick)) => {
                self.actuate(&tick.setpoints).await;
                if !tick.settled {
                    self.schedule(
                        Duration::from_millis(self.config.ramp.step_delay_ms),
                        ManagerEvent::RampTick(generation),
                    );
                }
                self.publish_snapshot();
            }
            Err(e) => {
                self.logger
                    .error(&format!("{}; snapping to target", e));
                let snapped = self.ramp.actuated();
                self.actuate(&snapped).await;
                self.publish_snapshot();
            }
        }
    }

    async fn command_stance(&mut self) {
        let stance = self.state.current;
        let mut all_ok = true;
        for unit in &self.config.batteries.units {
            if let Err(e) = self.commander.set_stance(&unit.name, stance).await {
                all_ok = false;
                get_logger_with_context(LogContext::new("manager").with_battery(&unit.name))
                    .warn(&format!("Stance command failed: {}", e));
            }
        }
        // A failed unit is retried on the next cycle
        self.commanded = all_ok.then_some(stance);
    }

    /// Send per-unit setpoints and the combined grid target; one failing unit
    /// does not stop the others
    async fn actuate(&self, setpoints: &[i32]) {
        for (unit, &watts) in self.config.batteries.units.iter().zip(setpoints) {
            if let Err(e) = self.commander.set_setpoint(&unit.name, watts).await {
                get_logger_with_context(
                    LogContext::new("manager")
                        .with_battery(&unit.name)
                        .with_field("setpoint", watts.to_string()),
                )
                .warn(&format!("Setpoint rejected: {}", e));
            }
        }

        let grid = setpoint::grid_target(setpoints);
        if let Err(e) = self.commander.set_grid_target(grid).await {
            self.logger
                .warn(&format!("Grid target {} W rejected: {}", grid, e));
        }
    }

    fn publish(&self, line: &str) {
        self.logger.info(line);
        let _ = self.status_tx.send(line.to_string());
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.snapshot()));
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let actuated = self.ramp.actuated();
        ManagerSnapshot {
            timestamp: (self.clock)().to_rfc3339(),
            stance: self.state.current,
            previous_stance: self.state.previous,
            greed: self.last_greed.clone(),
            reason: self.last_reason.clone(),
            degraded: self.degraded.clone(),
            grid_target: setpoint::grid_target(&actuated),
            actuated,
            target: self
                .targets
                .as_ref()
                .map(|t| t.per_battery.clone())
                .unwrap_or_default(),
            ramp_active: self.ramp.is_active(),
            profile_day: self.profile.as_ref().map(|p| p.day),
            stats: self.profile.as_ref().map(|p| p.stats),
            cheap_slots: self
                .profile
                .as_ref()
                .map(|p| p.cheap_slots.clone())
                .unwrap_or_default(),
            expensive_slots: self
                .profile
                .as_ref()
                .map(|p| p.expensive_slots.clone())
                .unwrap_or_default(),
            cycles: self.cycles,
        }
    }
}
