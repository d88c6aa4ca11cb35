//! Battery manager task
//!
//! A single tokio task owns every piece of mutable state: the price lists,
//! the stance state, the ramp and the debouncer. Collaborators post
//! [`ManagerEvent`]s through a [`ManagerHandle`]; timers are short-lived
//! tasks that post generation-tagged events back into the same mailbox, so
//! decision cycles never overlap.

use crate::battery::BatteryCommander;
use crate::config::Config;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::prices::{PriceAdjust, PricePoint, PriceProfile};
use crate::ramp::RampController;
use crate::setpoint::{SetpointCalculator, SetpointTargets};
use crate::stance::{Observation, Stance, StanceEngine, StanceState};
use crate::watchdog::{self, WatchdogDebouncer, WatchdogSignal};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

mod cycle;
mod events;

pub use events::{ManagerEvent, ManagerHandle, ManagerSnapshot};

/// How often the loop checks for a slot boundary
const SLOT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Wall clock used for slot lookup
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct BatteryManager {
    config: Config,
    tz: Tz,
    engine: StanceEngine,
    setpoints: SetpointCalculator,
    ramp: RampController,
    debouncer: WatchdogDebouncer,
    commander: Arc<dyn BatteryCommander>,
    clock: Clock,

    /// Net price lists keyed by local day (today and tomorrow)
    prices: BTreeMap<NaiveDate, Vec<PricePoint>>,
    profile: Option<PriceProfile>,
    current_price: Option<(DateTime<Utc>, f64)>,
    observation: Option<Observation>,

    state: StanceState,
    /// Stance last sent to the units
    commanded: Option<Stance>,
    targets: Option<SetpointTargets>,
    last_reason: String,
    last_greed: Option<String>,
    degraded: Option<String>,
    last_slot: Option<(NaiveDate, Option<usize>)>,
    cycles: u64,

    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    events_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    status_tx: broadcast::Sender<String>,
    snapshot_tx: watch::Sender<Arc<ManagerSnapshot>>,
    timers: Vec<JoinHandle<()>>,
    logger: StructuredLogger,
}

impl BatteryManager {
    pub fn new(config: Config, commander: Arc<dyn BatteryCommander>) -> Result<Self> {
        config.validate()?;
        let tz = config.tz()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel::<String>(100);
        let (snapshot_tx, _) = watch::channel(Arc::new(ManagerSnapshot::default()));

        let mut ramp = RampController::new(&config.ramp);
        ramp.seed(&vec![0; config.batteries.units.len()]);

        Ok(Self {
            tz,
            engine: StanceEngine::new(&config),
            setpoints: SetpointCalculator::new(&config),
            ramp,
            debouncer: WatchdogDebouncer::new(&config.watchdog),
            commander,
            clock: Arc::new(Utc::now),
            prices: BTreeMap::new(),
            profile: None,
            current_price: None,
            observation: None,
            state: StanceState::default(),
            commanded: None,
            targets: None,
            last_reason: "starting".to_string(),
            last_greed: None,
            degraded: None,
            last_slot: None,
            cycles: 0,
            events_tx,
            events_rx,
            status_tx,
            snapshot_tx,
            timers: Vec::new(),
            logger: get_logger("manager"),
            config,
        })
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            events_tx: self.events_tx.clone(),
            status_tx: self.status_tx.clone(),
            snapshot_rx: self.snapshot_tx.subscribe(),
            adjust: PriceAdjust::new(&self.config.prices.adjust),
        }
    }

    pub fn stance(&self) -> StanceState {
        self.state
    }

    /// Run until a shutdown event arrives
    pub async fn run(mut self) -> Result<()> {
        self.logger.info(&format!(
            "Starting battery manager for {} unit(s), timezone {}",
            self.config.batteries.units.len(),
            self.tz
        ));

        let mut slot_check = interval(SLOT_CHECK_INTERVAL);
        slot_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = slot_check.tick() => {
                    self.check_slot_boundary().await;
                }
                event = self.events_rx.recv() => match event {
                    Some(ManagerEvent::Shutdown) | None => {
                        self.logger.info("Shutdown requested");
                        break;
                    }
                    Some(event) => self.handle_event(event).await,
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Process one mailbox event
    pub async fn handle_event(&mut self, event: ManagerEvent) {
        let now = (self.clock)();
        match event {
            ManagerEvent::PriceList { day, points } => {
                self.logger
                    .info(&format!("Received {} prices for {}", points.len(), day));
                self.prices.insert(day, points);
                if day == self.local_day(now) {
                    // Force a rebuild from the new list
                    self.profile = None;
                    self.recompute(now).await;
                } else {
                    self.prune_prices(now);
                }
            }
            ManagerEvent::PriceTick { at, price } => {
                self.current_price = Some((at, price));
                self.recompute(now).await;
            }
            ManagerEvent::Observation(observation) => {
                let signals = match &self.observation {
                    Some(prev) => watchdog::detect(prev, &observation, &self.config.watchdog),
                    None => Vec::new(),
                };
                let cold_start = self.observation.is_none();
                self.observation = Some(*observation);
                if cold_start {
                    self.recompute(now).await;
                }
                for signal in signals {
                    self.trigger_watchdog(signal);
                }
            }
            ManagerEvent::Watchdog(signal) => self.trigger_watchdog(signal),
            ManagerEvent::DebounceElapsed(generation) => {
                if let Some(signals) = self.debouncer.fire(generation) {
                    let names: Vec<String> = signals.iter().map(|s| s.to_string()).collect();
                    self.logger
                        .info(&format!("Watchdog settled: {}", names.join(", ")));
                    self.recompute(now).await;
                }
            }
            ManagerEvent::RampTick(generation) => self.ramp_tick(generation).await,
            ManagerEvent::Shutdown => self.shutdown(),
        }
    }

    fn trigger_watchdog(&mut self, signal: WatchdogSignal) {
        self.logger.debug(&format!("Watchdog: {}", signal));
        let generation = self.debouncer.trigger(signal);
        self.schedule(
            self.debouncer.delay(),
            ManagerEvent::DebounceElapsed(generation),
        );
    }

    async fn check_slot_boundary(&mut self) {
        let now = (self.clock)();
        self.ensure_profile(now);
        let key = (
            self.local_day(now),
            self.profile.as_ref().and_then(|p| p.slot_at(now)),
        );
        if self.last_slot != Some(key) {
            self.last_slot = Some(key);
            self.recompute(now).await;
        }
    }

    /// Post `event` back into the mailbox after `delay`
    fn schedule(&mut self, delay: Duration, event: ManagerEvent) {
        self.timers.retain(|t| !t.is_finished());
        let tx = self.events_tx.clone();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        }));
    }

    /// Cancel every outstanding timer
    fn shutdown(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.ramp.cancel();
        self.debouncer.cancel();
        self.logger.info("Battery manager stopped");
    }

    fn local_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    fn prune_prices(&mut self, now: DateTime<Utc>) {
        let today = self.local_day(now);
        self.prices.retain(|day, _| *day >= today);
    }
}
