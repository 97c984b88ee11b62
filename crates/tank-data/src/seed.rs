//! Deterministic fixture data: a year of plausible daily usage.
//!
//! Usage follows a seasonal curve (peaking in mid-summer) with a fixed
//! hourly profile and small pseudo-random jitter from a seeded generator,
//! so the same `(year, seed)` always yields the same records.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use tank_core::calculations::VolumeCalculator;
use tank_core::models::{DailyUsageRecord, HOURS_PER_DAY};

use crate::store::UsageState;

/// Average household draw per day before seasonal scaling.
const BASE_DAILY_LITERS: f64 = 180.0;
const SEASONAL_AMPLITUDE: f64 = 0.3;

/// Relative weight of each local hour in a day's usage.
const HOURLY_PROFILE: [f64; HOURS_PER_DAY] = [
    0.2, 0.1, 0.1, 0.1, 0.2, 0.6, 1.6, 2.2, 1.8, 1.0, 0.8, 0.8, //
    1.0, 0.9, 0.7, 0.7, 0.9, 1.4, 1.9, 2.0, 1.5, 1.0, 0.6, 0.4,
];

/// Small linear congruential generator; only determinism matters here.
struct Lcg(u64);

impl Lcg {
    fn next_unit(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in `[1 - spread, 1 + spread)`.
    fn jitter(&mut self, spread: f64) -> f64 {
        1.0 + (self.next_unit() * 2.0 - 1.0) * spread
    }
}

/// One record per day of `year`, using `pump_rate_lpm` to derive run time.
pub fn seasonal_year(year: i32, seed: u64, pump_rate_lpm: f64) -> Vec<DailyUsageRecord> {
    let mut rng = Lcg(seed);
    let profile_total: f64 = HOURLY_PROFILE.iter().sum();

    let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| d.year() == year)
        .map(|date| {
            let season = (2.0 * std::f64::consts::PI * (f64::from(date.ordinal()) - 80.0) / 365.0).sin();
            let daily_target = BASE_DAILY_LITERS * (1.0 + SEASONAL_AMPLITUDE * season) * rng.jitter(0.1);

            let mut record = DailyUsageRecord::new(date);
            for (hour, weight) in HOURLY_PROFILE.iter().enumerate() {
                let liters = daily_target * weight / profile_total * rng.jitter(0.2);
                record.add_usage(hour, (liters * 10.0).round() / 10.0);
            }

            let intake = record.daily_usage_liters * rng.jitter(0.08) * 0.9;
            record.daily_intake_liters = (intake * 10.0).round() / 10.0;
            record.pump_run_time_minutes = if pump_rate_lpm > 0.0 {
                (record.daily_intake_liters / pump_rate_lpm).round()
            } else {
                0.0
            };
            record.efficiency_percent = VolumeCalculator::efficiency_percent(
                record.daily_intake_liters,
                record.daily_usage_liters,
                95.0,
            )
            .unwrap_or(0.0);
            record
        })
        .collect()
}

/// A [`UsageState`] holding [`seasonal_year`] and no level baseline.
pub fn seeded_state(year: i32, seed: u64, pump_rate_lpm: f64) -> UsageState {
    let records: BTreeMap<NaiveDate, DailyUsageRecord> = seasonal_year(year, seed, pump_rate_lpm)
        .into_iter()
        .map(|r| (r.date, r))
        .collect();
    UsageState {
        records,
        ..UsageState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{UsageAggregator, UsageConfig};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use tank_core::time_utils::TimezoneHandler;

    #[test]
    fn test_covers_every_day() {
        assert_eq!(seasonal_year(2023, 1, 20.0).len(), 365);
        assert_eq!(seasonal_year(2024, 1, 20.0).len(), 366);
    }

    #[test]
    fn test_deterministic_for_seed() {
        assert_eq!(seasonal_year(2024, 7, 20.0), seasonal_year(2024, 7, 20.0));
        assert_ne!(seasonal_year(2024, 7, 20.0), seasonal_year(2024, 8, 20.0));
    }

    #[test]
    fn test_records_are_consistent() {
        for r in seasonal_year(2024, 42, 20.0) {
            let bucket_sum: f64 = r.hourly_usage.iter().sum();
            assert!((bucket_sum - r.daily_usage_liters).abs() < 1e-6);
            assert!(r.daily_usage_liters > 0.0);
            assert!(r.efficiency_percent <= 95.0);
            assert!(r.hourly_usage.iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn test_summer_uses_more_than_winter() {
        let records = seasonal_year(2024, 3, 20.0);
        let month_total = |m: u32| -> f64 {
            records
                .iter()
                .filter(|r| r.date.month() == m)
                .map(|r| r.daily_usage_liters)
                .sum()
        };
        assert!(month_total(6) > month_total(12));
    }

    #[test]
    fn test_seeded_aggregator_rollups() {
        let store = MemoryStore::with_state(seeded_state(2024, 5, 20.0));
        let agg = UsageAggregator::open(
            UsageConfig::default(),
            TimezoneHandler::with_tz(chrono_tz::UTC),
            Box::new(store),
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let summary = agg.summary_at(now);

        assert_eq!(summary.daily.days_counted, 1);
        assert_eq!(summary.monthly.days_counted, 31);
        assert_eq!(summary.yearly.days_counted, 366);
        assert!(summary.yearly.usage_liters > summary.monthly.usage_liters);
        assert!(summary.yearly.efficiency_percent <= 95.0);
        assert_eq!(agg.get_historical_usage(30).len(), 30);
    }
}
