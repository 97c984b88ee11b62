//! Daily, monthly and yearly rollups of the per-day usage records.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use tank_core::calculations::VolumeCalculator;
use tank_core::models::{DailyUsageRecord, PeriodSummary, UsageSummary};

/// Roll a set of daily records into one period.
pub fn period_summary<'a, I>(records: I, efficiency_cap: f64) -> PeriodSummary
where
    I: IntoIterator<Item = &'a DailyUsageRecord>,
{
    let mut days = 0u32;
    let mut usage = 0.0;
    let mut intake = 0.0;
    let mut run_time = 0.0;
    for record in records {
        days += 1;
        usage += record.daily_usage_liters;
        intake += record.daily_intake_liters;
        run_time += record.pump_run_time_minutes;
    }

    PeriodSummary {
        usage_liters: usage,
        intake_liters: intake,
        net_liters: intake - usage,
        efficiency_percent: VolumeCalculator::efficiency_percent(intake, usage, efficiency_cap)
            .unwrap_or(0.0),
        pump_run_time_minutes: run_time,
        days_counted: days,
        average_daily_usage_liters: VolumeCalculator::average_per_day(usage, days),
        average_daily_intake_liters: VolumeCalculator::average_per_day(intake, days),
    }
}

/// Summaries for `today`, its calendar month and its calendar year.
pub fn summarize(
    records: &BTreeMap<NaiveDate, DailyUsageRecord>,
    today: NaiveDate,
    efficiency_cap: f64,
) -> UsageSummary {
    let same_year = |d: &NaiveDate| d.year() == today.year();
    let same_month = |d: &NaiveDate| same_year(d) && d.month() == today.month();

    UsageSummary {
        daily: period_summary(records.get(&today), efficiency_cap),
        monthly: period_summary(
            records.iter().filter(|(d, _)| same_month(*d)).map(|(_, r)| r),
            efficiency_cap,
        ),
        yearly: period_summary(
            records.iter().filter(|(d, _)| same_year(*d)).map(|(_, r)| r),
            efficiency_cap,
        ),
    }
}
