//! Daily price statistics and cheap/expensive slot selection
//!
//! A [`PriceProfile`] is built once per local day from that day's ordered
//! price series. It carries the quartile statistics used by the greed
//! evaluator and the two slot-index sets the stance engine consults.

use crate::config::PriceAdjustConfig;
use crate::error::{BatmanError, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One published price slot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Slot start
    pub starts_at: DateTime<Utc>,
    /// Net price in cents/kWh
    pub price: f64,
}

impl PricePoint {
    pub fn new(starts_at: DateTime<Utc>, price: f64) -> Self {
        Self { starts_at, price }
    }
}

/// Converts raw feed prices (EUR/kWh, excl. surcharges) into net consumer
/// prices (cents/kWh incl. surcharges and VAT).
#[derive(Debug, Clone, Copy)]
pub struct PriceAdjust {
    surcharge: f64,
    btw: f64,
}

impl PriceAdjust {
    pub fn new(cfg: &PriceAdjustConfig) -> Self {
        Self {
            surcharge: cfg.hike + cfg.extra + cfg.taxes,
            btw: cfg.btw,
        }
    }

    /// Net price for one raw price, rounded to 5 decimals
    pub fn net_price(&self, raw_eur_per_kwh: f64) -> f64 {
        let net = (raw_eur_per_kwh * 100.0 + self.surcharge) * self.btw;
        (net * 100_000.0).round() / 100_000.0
    }

    /// Convert a whole raw series, keeping slot starts
    pub fn net_series(&self, raw: &[PricePoint]) -> Vec<PricePoint> {
        raw.iter()
            .map(|p| PricePoint::new(p.starts_at, self.net_price(p.price)))
            .collect()
    }
}

/// Quartile statistics of one day's prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub mean: f64,
    pub q3: f64,
    pub max: f64,
}

impl PriceStatistics {
    /// Compute statistics with the inclusive (linear interpolation) percentile method
    pub fn compute(prices: &[f64]) -> Result<Self> {
        if prices.is_empty() {
            return Err(BatmanError::empty_prices("series"));
        }
        if let Some(bad) = prices.iter().find(|p| !p.is_finite()) {
            return Err(BatmanError::invalid_observation(
                "price".to_string(),
                format!("non-finite price {}", bad),
            ));
        }

        let mut sorted = prices.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        Ok(Self {
            min: sorted[0],
            q1: percentile(&sorted, 0.25),
            median: percentile(&sorted, 0.5),
            mean,
            q3: percentile(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
        })
    }

    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        format!(
            "min {:.3} : Q1 {:.3} : med {:.3} : avg {:.3} : Q3 {:.3} : max {:.3}",
            self.min, self.q1, self.median, self.mean, self.q3, self.max
        )
    }
}

/// Inclusive percentile over an ascending slice (`p` in 0..=1)
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Number of cheap (and expensive) slot candidates for a series of `n` samples.
///
/// The divisor is `selection_hours * samples_per_hour`, so the candidate
/// count is the same fraction of the day at any granularity.
pub fn slot_candidates(n: usize, selection_hours: u32) -> usize {
    let samples_per_hour = (n / 24).max(1);
    let ratio = (selection_hours as usize * samples_per_hour).max(1);
    n / ratio
}

/// Pick the `count` lowest and highest priced indices, keep only those
/// strictly below/above `mean`, and return both sets in ascending index order.
///
/// Ties keep original order: among equal prices the lower index wins.
pub fn select_slots(prices: &[f64], count: usize, mean: f64) -> (Vec<usize>, Vec<usize>) {
    let mut ascending: Vec<usize> = (0..prices.len()).collect();
    ascending.sort_by(|&a, &b| prices[a].total_cmp(&prices[b]).then(a.cmp(&b)));

    let mut descending: Vec<usize> = (0..prices.len()).collect();
    descending.sort_by(|&a, &b| prices[b].total_cmp(&prices[a]).then(a.cmp(&b)));

    let mut cheap: Vec<usize> = ascending
        .into_iter()
        .take(count)
        .filter(|&i| prices[i] < mean)
        .collect();
    cheap.sort_unstable();

    let mut expensive: Vec<usize> = descending
        .into_iter()
        .take(count)
        .filter(|&i| prices[i] > mean)
        .collect();
    expensive.sort_unstable();

    (cheap, expensive)
}

/// Today's prices with derived statistics and slot sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceProfile {
    pub day: NaiveDate,
    pub points: Vec<PricePoint>,
    pub stats: PriceStatistics,
    pub cheap_slots: Vec<usize>,
    pub expensive_slots: Vec<usize>,
}

impl PriceProfile {
    /// Build the profile for `day`; points are ordered by slot start first
    pub fn build(day: NaiveDate, mut points: Vec<PricePoint>, selection_hours: u32) -> Result<Self> {
        if points.is_empty() {
            return Err(BatmanError::empty_prices(day.to_string()));
        }
        points.sort_by_key(|p| p.starts_at);

        let prices: Vec<f64> = points.iter().map(|p| p.price).collect();
        let stats = PriceStatistics::compute(&prices)?;
        let count = slot_candidates(prices.len(), selection_hours);
        let (cheap_slots, expensive_slots) = select_slots(&prices, count, stats.mean);

        Ok(Self {
            day,
            points,
            stats,
            cheap_slots,
            expensive_slots,
        })
    }

    /// Length of one slot, inferred from the spacing of the series
    pub fn slot_length(&self) -> Duration {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() > 1 => {
                (last.starts_at - first.starts_at) / (self.points.len() as i32 - 1)
            }
            _ => Duration::hours(1),
        }
    }

    /// Index of the slot containing `now`, if any
    pub fn slot_at(&self, now: DateTime<Utc>) -> Option<usize> {
        let idx = self.points.partition_point(|p| p.starts_at <= now);
        if idx == 0 {
            return None;
        }
        let slot = idx - 1;
        let end = self
            .points
            .get(idx)
            .map_or_else(|| self.points[slot].starts_at + self.slot_length(), |p| p.starts_at);
        (now < end).then_some(slot)
    }

    /// Price of a slot
    pub fn price_at(&self, slot: usize) -> Option<f64> {
        self.points.get(slot).map(|p| p.price)
    }

    pub fn is_cheap(&self, slot: Option<usize>) -> bool {
        slot.is_some_and(|s| self.cheap_slots.binary_search(&s).is_ok())
    }

    pub fn is_expensive(&self, slot: Option<usize>) -> bool {
        slot.is_some_and(|s| self.expensive_slots.binary_search(&s).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(day: NaiveDate, prices: &[f64]) -> Vec<PricePoint> {
        let start = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PricePoint::new(start + Duration::hours(i as i64), p))
            .collect()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn empty_series_is_an_error() {
        assert!(matches!(
            PriceStatistics::compute(&[]),
            Err(BatmanError::EmptyPriceSeries { .. })
        ));
        assert!(matches!(
            PriceProfile::build(day(), Vec::new(), 8),
            Err(BatmanError::EmptyPriceSeries { .. })
        ));
    }

    #[test]
    fn quartiles_use_inclusive_interpolation() {
        let stats = PriceStatistics::compute(&[4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.q1, 2.0);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.q3, 4.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.mean, 3.0);

        let stats = PriceStatistics::compute(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((stats.q1 - 1.75).abs() < 1e-9);
        assert!((stats.median - 2.5).abs() < 1e-9);
        assert!((stats.q3 - 3.25).abs() < 1e-9);
    }

    #[test]
    fn quartiles_are_ordered() {
        let series = [
            [12.0, 3.5, 8.0, 30.1, 7.7, 7.7, 19.0, -2.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.1],
            [-5.0, -4.0, -3.0, -2.0, 40.0, 41.0, 42.0, 43.0],
        ];
        for s in series {
            let st = PriceStatistics::compute(&s).unwrap();
            assert!(st.min <= st.q1 && st.q1 <= st.median);
            assert!(st.median <= st.q3 && st.q3 <= st.max);
        }
    }

    #[test]
    fn non_finite_price_is_rejected() {
        assert!(matches!(
            PriceStatistics::compute(&[1.0, f64::NAN]),
            Err(BatmanError::InvalidObservation { .. })
        ));
    }

    #[test]
    fn candidate_count_scales_with_granularity() {
        assert_eq!(slot_candidates(24, 8), 3);
        assert_eq!(slot_candidates(96, 8), 3);
        assert_eq!(slot_candidates(23, 8), 2);
        assert_eq!(slot_candidates(24, 4), 6);
    }

    #[test]
    fn three_expensive_hours_scenario() {
        let mut prices = vec![10.0; 21];
        prices.extend([40.0, 40.0, 40.0]);
        let profile = PriceProfile::build(day(), hourly(day(), &prices), 8).unwrap();

        assert!((profile.stats.mean - 13.75).abs() < 1e-9);
        assert_eq!(profile.expensive_slots, vec![21, 22, 23]);
        assert_eq!(profile.cheap_slots, vec![0, 1, 2]);
        assert!(
            profile
                .cheap_slots
                .iter()
                .all(|&i| prices[i] < profile.stats.mean)
        );
    }

    #[test]
    fn quarter_hour_profile_selects_and_looks_up_slots() {
        let start = Utc.from_utc_datetime(&day().and_hms_opt(0, 0, 0).unwrap());
        let points: Vec<PricePoint> = (0..96)
            .map(|i| {
                let price = match i {
                    8..=10 => i as f64 - 3.0,
                    72..=74 => i as f64 - 32.0,
                    _ => 20.0,
                };
                PricePoint::new(start + Duration::minutes(15 * i), price)
            })
            .collect();
        let profile = PriceProfile::build(day(), points, 8).unwrap();

        assert_eq!(profile.slot_length(), Duration::minutes(15));
        assert_eq!(profile.cheap_slots, vec![8, 9, 10]);
        assert_eq!(profile.expensive_slots, vec![72, 73, 74]);

        assert_eq!(profile.slot_at(start), Some(0));
        assert_eq!(profile.slot_at(start + Duration::minutes(140)), Some(9));
        assert_eq!(profile.slot_at(start + Duration::minutes(18 * 60 + 14)), Some(72));
        assert_eq!(profile.slot_at(start + Duration::minutes(23 * 60 + 50)), Some(95));
        assert_eq!(profile.slot_at(start + Duration::hours(24)), None);
        assert_eq!(profile.slot_at(start - Duration::minutes(1)), None);
    }

    #[test]
    fn flat_series_has_no_actionable_slots() {
        let profile = PriceProfile::build(day(), hourly(day(), &[25.0; 24]), 8).unwrap();
        assert!(profile.cheap_slots.is_empty());
        assert!(profile.expensive_slots.is_empty());
    }

    #[test]
    fn unique_prices_give_disjoint_sets() {
        let prices: Vec<f64> = (0..24).map(|i| ((i * 7) % 24) as f64 + 0.5).collect();
        let profile = PriceProfile::build(day(), hourly(day(), &prices), 8).unwrap();
        assert_eq!(profile.cheap_slots.len(), 3);
        assert_eq!(profile.expensive_slots.len(), 3);
        assert!(
            profile
                .cheap_slots
                .iter()
                .all(|i| !profile.expensive_slots.contains(i))
        );
    }

    #[test]
    fn ties_prefer_lower_index() {
        let prices = [5.0, 1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let (cheap, expensive) = select_slots(&prices, 2, mean);
        assert_eq!(cheap, vec![1, 2]);
        assert_eq!(expensive, vec![5, 6]);
    }

    #[test]
    fn slot_lookup_covers_the_day() {
        let profile = PriceProfile::build(day(), hourly(day(), &[1.0; 24]), 8).unwrap();
        let midnight = Utc.from_utc_datetime(&day().and_hms_opt(0, 0, 0).unwrap());

        assert_eq!(profile.slot_length(), Duration::hours(1));
        assert_eq!(profile.slot_at(midnight), Some(0));
        assert_eq!(profile.slot_at(midnight + Duration::minutes(90)), Some(1));
        assert_eq!(profile.slot_at(midnight + Duration::minutes(23 * 60 + 59)), Some(23));
        assert_eq!(profile.slot_at(midnight + Duration::hours(24)), None);
        assert_eq!(profile.slot_at(midnight - Duration::minutes(1)), None);
    }

    #[test]
    fn net_price_applies_surcharges_and_vat() {
        let adjust = PriceAdjust::new(&PriceAdjustConfig::default());
        // (0.10 * 100 + 12.171) * 1.21
        assert!((adjust.net_price(0.10) - 26.82691).abs() < 1e-9);
        assert!((adjust.net_price(0.0) - 14.72691).abs() < 1e-9);
    }
}
