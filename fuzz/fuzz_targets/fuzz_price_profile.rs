#![no_main]
use batman::prices::{PricePoint, PriceProfile, PriceStatistics};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Interpret the input as a stream of little-endian f32 prices
    let prices: Vec<f64> = data
        .chunks_exact(4)
        .map(|b| f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
        .collect();

    let Ok(stats) = PriceStatistics::compute(&prices) else {
        return;
    };
    assert!(stats.min <= stats.q1 && stats.q1 <= stats.median);
    assert!(stats.median <= stats.q3 && stats.q3 <= stats.max);

    let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let start = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
    let points = prices
        .iter()
        .enumerate()
        .map(|(i, &p)| PricePoint::new(start + Duration::minutes(15 * i as i64), p))
        .collect();
    if let Ok(profile) = PriceProfile::build(day, points, 8) {
        assert!(profile.cheap_slots.iter().all(|&i| prices[i] < profile.stats.mean));
        assert!(profile.expensive_slots.iter().all(|&i| prices[i] > profile.stats.mean));
    }
});
