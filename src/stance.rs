//! Stance decision engine
//!
//! Once per decision cycle the engine turns an immutable observation snapshot
//! plus today's price profile into one of four stances. Rules are evaluated
//! in a fixed order and a later rule may override the stance an earlier one
//! produced:
//!
//! 1. control disabled: keep the previous state untouched, nothing else runs
//! 2. EV baseline: IDLE while the EV charges (unless assisting), else NOM
//! 3. sunny-day suppression: NOM in expensive slots while SoC is ample
//! 4. winter cheap-slot charge: CHARGE in every cheap slot
//! 5. greed override: CHARGE/DISCHARGE on extreme prices with SoC headroom
//!
//! The engine holds no state of its own. The caller carries [`StanceState`]
//! from one cycle to the next.

use crate::config::{Config, GreedConfig};
use crate::error::{BatmanError, Result};
use crate::greed::{Greed, GreedEvaluator};
use crate::prices::PriceProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Battery operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stance {
    /// Null-on-meter: the batteries balance the house on their own
    #[default]
    Nom,
    /// Hold; no setpoint is issued
    Idle,
    /// Forced charging from the grid
    Charge,
    /// Forced discharging
    Discharge,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nom => "NOM",
            Self::Idle => "IDLE",
            Self::Charge => "CHARGE",
            Self::Discharge => "DISCHARGE",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PV meter readings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PvReading {
    pub current_a: f64,
    pub voltage_v: f64,
    pub power_w: f64,
}

/// Everything the collaborators report for one decision cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    /// Average state of charge (0-100); derived from `battery_soc` when absent
    pub soc: Option<f64>,
    /// State of charge per battery unit
    pub battery_soc: Vec<f64>,
    /// Setpoint currently actuated per battery unit in W
    pub setpoints: Vec<i32>,
    pub pv: PvReading,
    pub ev_charging: bool,
    pub control_enabled: bool,
    /// SoC needed to cover base load until the next solar window
    pub min_soc: Option<f64>,
    pub sunny_day: bool,
    pub winter_override: bool,
    /// Externally supplied greed thresholds; configuration applies otherwise
    pub greed: Option<GreedConfig>,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            soc: None,
            battery_soc: Vec::new(),
            setpoints: Vec::new(),
            pv: PvReading::default(),
            ev_charging: false,
            control_enabled: true,
            min_soc: None,
            sunny_day: false,
            winter_override: false,
            greed: None,
        }
    }
}

impl Observation {
    /// Average SoC, falling back to the mean of the per-unit values
    pub fn average_soc(&self) -> Option<f64> {
        self.soc.or_else(|| {
            (!self.battery_soc.is_empty())
                .then(|| self.battery_soc.iter().sum::<f64>() / self.battery_soc.len() as f64)
        })
    }

    /// Sunny, non-winter operation
    pub fn sunny_mode(&self) -> bool {
        self.sunny_day && !self.winter_override
    }
}

fn check_percentage(field: &str, value: Option<f64>) -> Result<f64> {
    match value {
        None => Err(BatmanError::invalid_observation(
            field.to_string(),
            "missing".to_string(),
        )),
        Some(v) if !v.is_finite() || !(0.0..=100.0).contains(&v) => {
            Err(BatmanError::invalid_observation(
                field.to_string(),
                format!("{} is not a percentage", v),
            ))
        }
        Some(v) => Ok(v),
    }
}

/// Current and previous stance, carried between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StanceState {
    pub current: Stance,
    pub previous: Stance,
}

impl StanceState {
    /// Advance to `next`, remembering the stance being replaced
    pub fn advance(self, next: Stance) -> Self {
        Self {
            current: next,
            previous: self.current,
        }
    }
}

/// Inputs of one decision cycle
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub observation: &'a Observation,
    pub profile: Option<&'a PriceProfile>,
    pub now: DateTime<Utc>,
    /// Current net price; the profile's slot price is used when absent
    pub price: Option<f64>,
}

/// Validated, derived view that every rule reads from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleContext {
    pub soc: f64,
    pub min_soc: f64,
    pub ev_charging: bool,
    pub ev_assist: bool,
    pub sunny_mode: bool,
    pub cheap_slot: bool,
    pub expensive_slot: bool,
    pub greed: Greed,
    /// Energy above the reserve, expressed as power over one hour
    pub headroom_w: f64,
    /// SoC one hour of full discharge takes out of the bank
    pub hour_of_discharge_soc: f64,
    pub discharge_floor_w: f64,
    /// Stance of the cycle before this one
    pub previous: Stance,
}

/// A precedence step: returns the stance to force, or `None` to pass
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&RuleContext, Stance) -> Option<Stance>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

fn ev_baseline(ctx: &RuleContext, _tentative: Stance) -> Option<Stance> {
    // Assist only relaxes the hold; it never forces a discharge
    if ctx.ev_charging && !(ctx.ev_assist && ctx.soc > ctx.min_soc) {
        Some(Stance::Idle)
    } else {
        Some(Stance::Nom)
    }
}

fn sunny_expensive_hold(ctx: &RuleContext, _tentative: Stance) -> Option<Stance> {
    (ctx.sunny_mode && ctx.soc > ctx.min_soc + ctx.hour_of_discharge_soc && ctx.expensive_slot)
        .then_some(Stance::Nom)
}

fn winter_cheap_charge(ctx: &RuleContext, _tentative: Stance) -> Option<Stance> {
    (!ctx.sunny_mode && ctx.cheap_slot).then_some(Stance::Charge)
}

fn greed_override(ctx: &RuleContext, _tentative: Stance) -> Option<Stance> {
    match ctx.greed {
        Greed::ChargeGreedy
            if (ctx.previous == Stance::Charge && ctx.soc < 99.9) || ctx.soc < ctx.min_soc =>
        {
            Some(Stance::Charge)
        }
        Greed::DischargeGreedy
            if (ctx.previous == Stance::Discharge && ctx.soc > ctx.min_soc)
                || ctx.headroom_w > ctx.discharge_floor_w =>
        {
            Some(Stance::Discharge)
        }
        _ => None,
    }
}

/// Rules 2 to 5 in precedence order; rule 1 is checked before any of them
pub const RULES: [Rule; 4] = [
    Rule {
        name: "ev-baseline",
        apply: ev_baseline,
    },
    Rule {
        name: "sunny-expensive-hold",
        apply: sunny_expensive_hold,
    },
    Rule {
        name: "winter-cheap-charge",
        apply: winter_cheap_charge,
    },
    Rule {
        name: "greed-override",
        apply: greed_override,
    },
];

/// Apply the rule ladder; returns the final stance and the last rule that set it
pub fn apply_rules(ctx: &RuleContext) -> (Stance, &'static str) {
    RULES
        .iter()
        .fold((Stance::Nom, "default"), |(stance, by), rule| {
            match (rule.apply)(ctx, stance) {
                Some(next) => (next, rule.name),
                None => (stance, by),
            }
        })
}

/// Why the engine produced its state
#[derive(Debug)]
pub enum StanceReason {
    /// Control is externally disabled; state carried over untouched
    ControlDisabled,
    /// The named rule set the final stance
    Rule(&'static str),
    /// Inputs were missing or invalid; state carried over untouched
    Degraded(BatmanError),
}

/// Result of one decision cycle
#[derive(Debug)]
pub struct StanceVerdict {
    pub state: StanceState,
    pub reason: StanceReason,
    /// Greed classification used, when the rules ran
    pub greed: Option<Greed>,
}

impl StanceVerdict {
    pub fn is_degraded(&self) -> bool {
        matches!(self.reason, StanceReason::Degraded(_))
    }
}

/// Precedence-ordered stance decision function
#[derive(Debug, Clone)]
pub struct StanceEngine {
    greed: GreedConfig,
    trading: bool,
    ev_assist: bool,
    ev_assist_above_q3: bool,
    discharge_floor_w: f64,
    bank_capacity_wh: f64,
    hour_of_discharge_soc: f64,
}

impl StanceEngine {
    pub fn new(config: &Config) -> Self {
        let units = config.batteries.units.len().max(1) as f64;
        let bank_capacity_wh = config.batteries.capacity_wh * units;
        // One consistent SoC <-> power conversion: through the bank capacity
        let hour_of_discharge_soc =
            config.batteries.max_discharge_w * units / bank_capacity_wh * 100.0;
        Self {
            greed: config.prices.greed,
            trading: config.prices.trading,
            ev_assist: config.strategy.ev_assist,
            ev_assist_above_q3: config.strategy.ev_assist_above_q3,
            discharge_floor_w: config.strategy.discharge_floor_w,
            bank_capacity_wh,
            hour_of_discharge_soc,
        }
    }

    /// Validate inputs and derive the rule context
    pub fn context(&self, previous: Stance, input: &DecisionInput<'_>) -> Result<RuleContext> {
        let obs = input.observation;
        let soc = check_percentage("soc", obs.average_soc())?;
        let min_soc = check_percentage("min_soc", obs.min_soc)?;
        let profile = input
            .profile
            .ok_or_else(|| BatmanError::empty_prices(input.now.date_naive().to_string()))?;

        let slot = profile.slot_at(input.now);
        let price = input.price.or_else(|| slot.and_then(|s| profile.price_at(s)));
        if let Some(p) = price
            && !p.is_finite()
        {
            return Err(BatmanError::invalid_observation(
                "price".to_string(),
                format!("{} is not a price", p),
            ));
        }

        let evaluator = GreedEvaluator::new(obs.greed.unwrap_or(self.greed), self.trading);
        let greed = price.map_or(Greed::Neutral, |p| evaluator.evaluate(p, profile.stats.min));
        let ev_assist =
            self.ev_assist || (self.ev_assist_above_q3 && price.is_some_and(|p| p > profile.stats.q3));

        Ok(RuleContext {
            soc,
            min_soc,
            ev_charging: obs.ev_charging,
            ev_assist,
            sunny_mode: obs.sunny_mode(),
            cheap_slot: profile.is_cheap(slot),
            expensive_slot: profile.is_expensive(slot),
            greed,
            headroom_w: (soc - min_soc).max(0.0) / 100.0 * self.bank_capacity_wh,
            hour_of_discharge_soc: self.hour_of_discharge_soc,
            discharge_floor_w: self.discharge_floor_w,
            previous,
        })
    }

    /// Run one decision cycle against `state`
    pub fn evaluate(&self, state: StanceState, input: &DecisionInput<'_>) -> StanceVerdict {
        if !input.observation.control_enabled {
            return StanceVerdict {
                state,
                reason: StanceReason::ControlDisabled,
                greed: None,
            };
        }

        match self.context(state.current, input) {
            Ok(ctx) => {
                let (stance, rule) = apply_rules(&ctx);
                StanceVerdict {
                    state: state.advance(stance),
                    reason: StanceReason::Rule(rule),
                    greed: Some(ctx.greed),
                }
            }
            Err(e) => StanceVerdict {
                state,
                reason: StanceReason::Degraded(e),
                greed: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prices::PricePoint;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn at_hour(h: i64) -> DateTime<Utc> {
        Utc.from_utc_datetime(&day().and_hms_opt(0, 0, 0).unwrap()) + Duration::hours(h)
            + Duration::minutes(10)
    }

    /// Cheap hours 2,3,4; expensive hours 17,18,19; everything else 20
    fn profile() -> PriceProfile {
        let start = Utc.from_utc_datetime(&day().and_hms_opt(0, 0, 0).unwrap());
        let points = (0..24)
            .map(|h| {
                let price = match h {
                    2..=4 => 5.0 + h as f64,
                    17..=19 => 30.0 + h as f64,
                    _ => 20.0,
                };
                PricePoint::new(start + Duration::hours(h), price)
            })
            .collect();
        PriceProfile::build(day(), points, 8).unwrap()
    }

    fn observation(soc: f64, min_soc: f64) -> Observation {
        Observation {
            soc: Some(soc),
            min_soc: Some(min_soc),
            ..Default::default()
        }
    }

    fn ctx() -> RuleContext {
        RuleContext {
            soc: 50.0,
            min_soc: 20.0,
            ev_charging: false,
            ev_assist: false,
            sunny_mode: false,
            cheap_slot: false,
            expensive_slot: false,
            greed: Greed::Neutral,
            headroom_w: 3000.0,
            hour_of_discharge_soc: 34.0,
            discharge_floor_w: 1700.0,
            previous: Stance::Nom,
        }
    }

    fn run(
        engine: &StanceEngine,
        state: StanceState,
        obs: &Observation,
        hour: i64,
        price: Option<f64>,
    ) -> StanceVerdict {
        let profile = profile();
        engine.evaluate(
            state,
            &DecisionInput {
                observation: obs,
                profile: Some(&profile),
                now: at_hour(hour),
                price,
            },
        )
    }

    #[test]
    fn profile_fixture_has_expected_slots() {
        let p = profile();
        assert_eq!(p.cheap_slots, vec![2, 3, 4]);
        assert_eq!(p.expensive_slots, vec![17, 18, 19]);
    }

    #[test]
    fn neutral_mid_day_stays_nom() {
        let engine = StanceEngine::new(&Config::default());
        let v = run(
            &engine,
            StanceState::default(),
            &observation(50.0, 20.0),
            10,
            Some(20.0),
        );
        assert_eq!(v.state.current, Stance::Nom);
        assert_eq!(v.greed, Some(Greed::Neutral));
        assert!(matches!(v.reason, StanceReason::Rule("ev-baseline")));
    }

    #[test]
    fn low_soc_in_cheap_winter_slot_charges() {
        let engine = StanceEngine::new(&Config::default());
        let v = run(
            &engine,
            StanceState::default(),
            &observation(15.0, 20.0),
            3,
            None,
        );
        assert_eq!(v.state.current, Stance::Charge);
        assert_eq!(v.state.previous, Stance::Nom);
    }

    #[test]
    fn cheap_slot_charges_regardless_of_soc_in_winter() {
        let engine = StanceEngine::new(&Config::default());
        let v = run(
            &engine,
            StanceState::default(),
            &observation(98.0, 20.0),
            2,
            None,
        );
        assert_eq!(v.state.current, Stance::Charge);
        assert!(matches!(v.reason, StanceReason::Rule("winter-cheap-charge")));
    }

    #[test]
    fn disabled_control_preserves_state() {
        let engine = StanceEngine::new(&Config::default());
        let state = StanceState {
            current: Stance::Discharge,
            previous: Stance::Charge,
        };
        let mut obs = observation(15.0, 20.0);
        obs.control_enabled = false;
        obs.ev_charging = true;

        let v = run(&engine, state, &obs, 3, Some(-5.0));
        assert_eq!(v.state, state);
        assert!(matches!(v.reason, StanceReason::ControlDisabled));

        // Even with no usable inputs at all
        let empty = Observation {
            control_enabled: false,
            ..Default::default()
        };
        let v = engine.evaluate(
            state,
            &DecisionInput {
                observation: &empty,
                profile: None,
                now: at_hour(0),
                price: None,
            },
        );
        assert_eq!(v.state, state);
    }

    #[test]
    fn missing_inputs_degrade_without_changing_state() {
        let engine = StanceEngine::new(&Config::default());
        let state = StanceState {
            current: Stance::Charge,
            previous: Stance::Nom,
        };

        let no_soc = Observation {
            min_soc: Some(20.0),
            ..Default::default()
        };
        let v = run(&engine, state, &no_soc, 10, None);
        assert_eq!(v.state, state);
        assert!(matches!(
            v.reason,
            StanceReason::Degraded(BatmanError::InvalidObservation { .. })
        ));

        let v = run(&engine, state, &observation(140.0, 20.0), 10, None);
        assert!(v.is_degraded());

        let obs = observation(50.0, 20.0);
        let v = engine.evaluate(
            state,
            &DecisionInput {
                observation: &obs,
                profile: None,
                now: at_hour(10),
                price: None,
            },
        );
        assert_eq!(v.state, state);
        assert!(matches!(
            v.reason,
            StanceReason::Degraded(BatmanError::EmptyPriceSeries { .. })
        ));
    }

    #[test]
    fn per_unit_soc_is_averaged() {
        let obs = Observation {
            battery_soc: vec![10.0, 20.0],
            ..Default::default()
        };
        assert_eq!(obs.average_soc(), Some(15.0));
        assert_eq!(Observation::default().average_soc(), None);
    }

    #[test]
    fn identical_observations_are_idempotent() {
        let engine = StanceEngine::new(&Config::default());
        let cases = [
            (observation(50.0, 20.0), 10, Some(20.0)),
            (observation(15.0, 20.0), 3, None),
            (observation(15.0, 20.0), 10, Some(-2.0)),
            (observation(90.0, 20.0), 18, None),
        ];
        for (obs, hour, price) in cases {
            let first = run(&engine, StanceState::default(), &obs, hour, price);
            let second = run(&engine, first.state, &obs, hour, price);
            assert_eq!(first.state.current, second.state.current);
        }
    }

    #[test]
    fn ev_charging_idles_unless_assisting() {
        let mut c = ctx();
        c.ev_charging = true;
        assert_eq!(ev_baseline(&c, Stance::Nom), Some(Stance::Idle));

        c.ev_assist = true;
        assert_eq!(ev_baseline(&c, Stance::Nom), Some(Stance::Nom));

        c.soc = 15.0;
        assert_eq!(ev_baseline(&c, Stance::Nom), Some(Stance::Idle));

        c.ev_charging = false;
        assert_eq!(ev_baseline(&c, Stance::Idle), Some(Stance::Nom));
    }

    #[test]
    fn sunny_expensive_slot_holds_nom() {
        let mut c = ctx();
        c.sunny_mode = true;
        c.expensive_slot = true;
        c.soc = 60.0;
        assert_eq!(sunny_expensive_hold(&c, Stance::Idle), Some(Stance::Nom));

        // 20 + 34 = 54 is the threshold
        c.soc = 54.0;
        assert_eq!(sunny_expensive_hold(&c, Stance::Idle), None);

        c.soc = 60.0;
        c.sunny_mode = false;
        assert_eq!(sunny_expensive_hold(&c, Stance::Idle), None);
    }

    #[test]
    fn cheap_slot_charge_only_outside_sunny_mode() {
        let mut c = ctx();
        c.cheap_slot = true;
        assert_eq!(winter_cheap_charge(&c, Stance::Nom), Some(Stance::Charge));
        c.sunny_mode = true;
        assert_eq!(winter_cheap_charge(&c, Stance::Nom), None);
    }

    #[test]
    fn greedy_charge_needs_hysteresis_or_low_soc() {
        let mut c = ctx();
        c.greed = Greed::ChargeGreedy;
        assert_eq!(greed_override(&c, Stance::Nom), None);

        c.previous = Stance::Charge;
        assert_eq!(greed_override(&c, Stance::Nom), Some(Stance::Charge));

        c.soc = 99.95;
        assert_eq!(greed_override(&c, Stance::Nom), None);

        c.previous = Stance::Nom;
        c.soc = 10.0;
        assert_eq!(greed_override(&c, Stance::Nom), Some(Stance::Charge));
    }

    #[test]
    fn greedy_discharge_needs_hysteresis_or_headroom() {
        let mut c = ctx();
        c.greed = Greed::DischargeGreedy;
        c.headroom_w = 1000.0;
        assert_eq!(greed_override(&c, Stance::Nom), None);

        c.previous = Stance::Discharge;
        assert_eq!(greed_override(&c, Stance::Nom), Some(Stance::Discharge));

        c.soc = 19.0;
        assert_eq!(greed_override(&c, Stance::Nom), None);

        c.previous = Stance::Nom;
        c.headroom_w = 2000.0;
        assert_eq!(greed_override(&c, Stance::Nom), Some(Stance::Discharge));
    }

    #[test]
    fn greed_overrides_sunny_hold() {
        let mut config = Config::default();
        config.prices.trading = true;
        let engine = StanceEngine::new(&config);

        let mut obs = observation(90.0, 20.0);
        obs.sunny_day = true;
        let v = run(&engine, StanceState::default(), &obs, 18, Some(48.0));
        assert_eq!(v.greed, Some(Greed::DischargeGreedy));
        assert_eq!(v.state.current, Stance::Discharge);
        assert!(matches!(v.reason, StanceReason::Rule("greed-override")));
    }

    #[test]
    fn winter_override_disables_sunny_mode() {
        let engine = StanceEngine::new(&Config::default());
        let mut obs = observation(60.0, 20.0);
        obs.sunny_day = true;
        let v = run(&engine, StanceState::default(), &obs, 3, None);
        assert_eq!(v.state.current, Stance::Nom);

        obs.winter_override = true;
        let v = run(&engine, StanceState::default(), &obs, 3, None);
        assert_eq!(v.state.current, Stance::Charge);
    }

    #[test]
    fn headroom_uses_bank_capacity() {
        let engine = StanceEngine::new(&Config::default());
        let obs = observation(50.0, 20.0);
        let profile = profile();
        let c = engine
            .context(
                Stance::Nom,
                &DecisionInput {
                    observation: &obs,
                    profile: Some(&profile),
                    now: at_hour(10),
                    price: None,
                },
            )
            .unwrap();
        // 30% of 2 x 5000 Wh
        assert!((c.headroom_w - 3000.0).abs() < 1e-9);
        // 2 x 1700 W of 10000 Wh
        assert!((c.hour_of_discharge_soc - 34.0).abs() < 1e-9);
    }
}
