use crate::error::{BatmanError, Result};
use crate::prices::{PriceAdjust, PricePoint, PriceStatistics};
use crate::stance::{Observation, Stance};
use crate::watchdog::WatchdogSignal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Mailbox of the manager task
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Full price list (net prices) for one local day
    PriceList {
        day: NaiveDate,
        points: Vec<PricePoint>,
    },
    /// Current net price; triggers a decision cycle
    PriceTick { at: DateTime<Utc>, price: f64 },
    /// Fresh telemetry from the collaborators
    Observation(Box<Observation>),
    /// Externally detected watchdog signal
    Watchdog(WatchdogSignal),
    /// Settle timer of the given debounce generation elapsed
    DebounceElapsed(u64),
    /// Inter-step delay of the given ramp generation elapsed
    RampTick(u64),
    Shutdown,
}

/// Published view of the manager state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub timestamp: String,
    pub stance: Stance,
    pub previous_stance: Stance,
    pub greed: Option<String>,
    /// Rule (or condition) behind the current stance
    pub reason: String,
    /// Last degraded-input condition, cleared by the next good cycle
    pub degraded: Option<String>,
    pub actuated: Vec<i32>,
    pub target: Vec<i32>,
    pub grid_target: i32,
    pub ramp_active: bool,
    pub profile_day: Option<NaiveDate>,
    pub stats: Option<PriceStatistics>,
    pub cheap_slots: Vec<usize>,
    pub expensive_slots: Vec<usize>,
    pub cycles: u64,
}

impl Default for ManagerSnapshot {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stance: Stance::Nom,
            previous_stance: Stance::Nom,
            greed: None,
            reason: "starting".to_string(),
            degraded: None,
            actuated: Vec::new(),
            target: Vec::new(),
            grid_target: 0,
            ramp_active: false,
            profile_day: None,
            stats: None,
            cheap_slots: Vec::new(),
            expensive_slots: Vec::new(),
            cycles: 0,
        }
    }
}

/// Cloneable collaborator-facing handle to a running manager
#[derive(Clone)]
pub struct ManagerHandle {
    pub(super) events_tx: mpsc::UnboundedSender<ManagerEvent>,
    pub(super) status_tx: broadcast::Sender<String>,
    pub(super) snapshot_rx: watch::Receiver<Arc<ManagerSnapshot>>,
    pub(super) adjust: PriceAdjust,
}

impl ManagerHandle {
    fn send(&self, event: ManagerEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .map_err(|_| BatmanError::generic("battery manager is not running"))
    }

    /// Publish a day's net prices
    pub fn publish_prices(&self, day: NaiveDate, points: Vec<PricePoint>) -> Result<()> {
        self.send(ManagerEvent::PriceList { day, points })
    }

    /// Publish a day's raw feed prices (EUR/kWh excl. surcharges)
    pub fn publish_raw_prices(&self, day: NaiveDate, raw: &[PricePoint]) -> Result<()> {
        self.publish_prices(day, self.adjust.net_series(raw))
    }

    pub fn price_tick(&self, at: DateTime<Utc>, price: f64) -> Result<()> {
        self.send(ManagerEvent::PriceTick { at, price })
    }

    pub fn raw_price_tick(&self, at: DateTime<Utc>, raw: f64) -> Result<()> {
        self.price_tick(at, self.adjust.net_price(raw))
    }

    pub fn observe(&self, observation: Observation) -> Result<()> {
        self.send(ManagerEvent::Observation(Box::new(observation)))
    }

    pub fn watchdog(&self, signal: WatchdogSignal) -> Result<()> {
        self.send(ManagerEvent::Watchdog(signal))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ManagerEvent::Shutdown)
    }

    /// Human-readable status lines, one per decision cycle
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<ManagerSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Wait for the next published snapshot
    pub async fn changed(&mut self) -> Result<Arc<ManagerSnapshot>> {
        self.snapshot_rx
            .changed()
            .await
            .map_err(|_| BatmanError::generic("battery manager stopped"))?;
        Ok(self.snapshot_rx.borrow_and_update().clone())
    }
}
