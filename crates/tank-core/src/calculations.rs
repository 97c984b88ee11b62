// ── VolumeCalculator ──────────────────────────────────────────────────────────

/// Stateless collection of volume, intake and efficiency calculations.
pub struct VolumeCalculator;

impl VolumeCalculator {
    /// Convert a level change in percentage points to liters.
    pub fn percent_to_liters(delta_percent: f64, capacity_liters: f64) -> f64 {
        delta_percent / 100.0 * capacity_liters
    }

    /// Liters consumed between two level observations.
    ///
    /// Returns `None` when the drop is at or below `noise_threshold` (rises
    /// included). Otherwise the converted volume, clamped to `cap_liters`.
    pub fn usage_from_drop(
        previous_level: f64,
        current_level: f64,
        capacity_liters: f64,
        noise_threshold: f64,
        cap_liters: f64,
    ) -> Option<f64> {
        let delta = previous_level - current_level;
        if delta <= noise_threshold {
            return None;
        }
        Some(Self::percent_to_liters(delta, capacity_liters).min(cap_liters))
    }

    /// Intake attributed to `minutes` of pump activity at `rate_lpm`.
    pub fn intake_for(minutes: f64, rate_lpm: f64) -> f64 {
        minutes.max(0.0) * rate_lpm
    }

    /// Intake over usage in percent, rounded and capped at `cap`.
    ///
    /// Returns `None` when there is no usage to compare against.
    pub fn efficiency_percent(intake_liters: f64, usage_liters: f64, cap: f64) -> Option<f64> {
        if usage_liters <= 0.0 {
            return None;
        }
        Some((intake_liters / usage_liters * 100.0).round().min(cap))
    }

    /// Divide `total` by `days`, treating zero days as one.
    pub fn average_per_day(total: f64, days: u32) -> f64 {
        total / f64::from(days.max(1))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_to_liters() {
        assert!((VolumeCalculator::percent_to_liters(5.0, 10_000.0) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_usage_from_drop_below_noise() {
        assert_eq!(
            VolumeCalculator::usage_from_drop(60.0, 59.6, 10_000.0, 0.5, 50.0),
            None
        );
        // exactly at the threshold is still noise
        assert_eq!(
            VolumeCalculator::usage_from_drop(60.0, 59.5, 10_000.0, 0.5, 50.0),
            None
        );
    }

    #[test]
    fn test_usage_from_drop_rise_is_none() {
        assert_eq!(
            VolumeCalculator::usage_from_drop(40.0, 70.0, 1000.0, 0.5, 50.0),
            None
        );
    }

    #[test]
    fn test_usage_from_drop_capped() {
        let used = VolumeCalculator::usage_from_drop(60.0, 55.0, 10_000.0, 0.5, 50.0).unwrap();
        assert_eq!(used, 50.0);
    }

    #[test]
    fn test_usage_from_drop_under_cap() {
        let used = VolumeCalculator::usage_from_drop(60.0, 58.0, 1000.0, 0.5, 50.0).unwrap();
        assert!((used - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_intake_for() {
        assert!((VolumeCalculator::intake_for(0.5, 20.0) - 10.0).abs() < 1e-9);
        assert_eq!(VolumeCalculator::intake_for(-3.0, 20.0), 0.0);
    }

    #[test]
    fn test_efficiency_capped() {
        assert_eq!(VolumeCalculator::efficiency_percent(500.0, 100.0, 95.0), Some(95.0));
        assert_eq!(VolumeCalculator::efficiency_percent(40.0, 100.0, 95.0), Some(40.0));
        assert_eq!(VolumeCalculator::efficiency_percent(10.0, 0.0, 95.0), None);
    }

    #[test]
    fn test_average_per_day_zero_days() {
        assert_eq!(VolumeCalculator::average_per_day(0.0, 0), 0.0);
        assert_eq!(VolumeCalculator::average_per_day(30.0, 3), 10.0);
    }
}
