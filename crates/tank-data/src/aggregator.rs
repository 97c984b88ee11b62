//! Conversion of level readings into daily usage and intake.
//!
//! [`UsageAggregator`] keeps one [`DailyUsageRecord`] per local calendar day.
//! Each ingested reading is compared against the previously observed level:
//! a drop beyond the noise threshold counts as usage in the current hour
//! bucket, and time spent with the pump inferred ON counts as intake at a
//! fixed rate. State is written through a [`UsageStore`] after every change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tank_core::calculations::VolumeCalculator;
use tank_core::models::{DailyUsageRecord, Reading, UsageSummary, HOURS_PER_DAY};
use tank_core::time_utils::TimezoneHandler;
use tank_core::{Result, TankError};
use tracing::{debug, info, warn};

use crate::store::{UsageState, UsageStore};
use crate::summary::summarize;

// ── UsageConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageConfig {
    /// Level drops at or below this many percentage points are sensor noise.
    pub noise_threshold_percent: f64,
    /// Upper bound on usage attributed to a single ingestion.
    pub max_liters_per_ingest: f64,
    /// Assumed pump delivery while ON.
    pub pump_rate_lpm: f64,
    /// Accrual used for the first ingestion, when there is no previous one.
    pub poll_interval: Duration,
    /// Longest gap between ingestions credited as pump run time.
    pub max_accrual_window: Duration,
    pub efficiency_cap_percent: f64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            noise_threshold_percent: 0.5,
            max_liters_per_ingest: 50.0,
            pump_rate_lpm: 20.0,
            poll_interval: Duration::from_secs(30),
            max_accrual_window: Duration::from_secs(15 * 60),
            efficiency_cap_percent: 95.0,
        }
    }
}

// ── IngestOutcome ─────────────────────────────────────────────────────────────

/// What a single ingestion contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub used_liters: f64,
    pub intake_liters: f64,
    /// The reading was a duplicate or the connection-error sentinel.
    pub skipped: bool,
}

impl IngestOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

// ── UsageAggregator ───────────────────────────────────────────────────────────

pub struct UsageAggregator {
    config: UsageConfig,
    timezone: TimezoneHandler,
    store: Box<dyn UsageStore>,
    state: UsageState,
    /// In-memory state has changes the store has not accepted yet.
    dirty: bool,
}

impl UsageAggregator {
    /// Load persisted state from `store`.
    ///
    /// An unreadable or corrupt store is logged and replaced by an empty
    /// state; the aggregator always opens.
    pub fn open(config: UsageConfig, timezone: TimezoneHandler, store: Box<dyn UsageStore>) -> Self {
        let state = match store.load() {
            Ok(Some(state)) => {
                info!(
                    location = %store.location(),
                    records = state.records.len(),
                    "loaded usage state"
                );
                state
            }
            Ok(None) => {
                debug!(location = %store.location(), "no usage state yet; starting empty");
                UsageState::default()
            }
            Err(e @ TankError::StorageCorrupt { .. }) => {
                warn!(error = %e, "usage store corrupt; starting with a clean slate");
                UsageState::default()
            }
            Err(e) => {
                warn!(error = %e, "usage store unreadable; starting empty");
                UsageState::default()
            }
        };

        Self {
            config,
            timezone,
            store,
            state,
            dirty: false,
        }
    }

    // ── Ingestion ─────────────────────────────────────────────────────────

    pub fn ingest(&mut self, reading: &Reading) -> IngestOutcome {
        self.ingest_at(reading, Utc::now())
    }

    /// Ingest `reading` as if the wall clock were `now`.
    pub fn ingest_at(&mut self, reading: &Reading, now: DateTime<Utc>) -> IngestOutcome {
        if reading.is_sentinel() {
            debug!("skipping connection-error reading");
            return IngestOutcome::skipped();
        }
        if let Some(previous) = self.state.last_reading_at {
            if reading.timestamp <= previous {
                debug!(
                    timestamp = %reading.timestamp,
                    last = %previous,
                    "skipping reading that is not newer than the last ingested one"
                );
                return IngestOutcome::skipped();
            }
        }

        let (date, hour) = self.timezone.local_date_hour(now);
        let minutes = self.accrual_minutes(now);
        let previous_level = self.state.last_observed_level;
        let cfg = self.config;

        let record = self
            .state
            .records
            .entry(date)
            .or_insert_with(|| DailyUsageRecord::new(date));

        let used = previous_level
            .and_then(|prev| {
                VolumeCalculator::usage_from_drop(
                    prev,
                    reading.level_percent,
                    reading.tank_capacity_liters,
                    cfg.noise_threshold_percent,
                    cfg.max_liters_per_ingest,
                )
            })
            .unwrap_or(0.0);
        if used > 0.0 {
            record.add_usage(hour, used);
        }

        let mut intake = 0.0;
        if reading.pump_state.is_on() {
            intake = VolumeCalculator::intake_for(minutes, cfg.pump_rate_lpm);
            record.daily_intake_liters += intake;
            record.pump_run_time_minutes += minutes;
        }

        if let Some(efficiency) = VolumeCalculator::efficiency_percent(
            record.daily_intake_liters,
            record.daily_usage_liters,
            cfg.efficiency_cap_percent,
        ) {
            record.efficiency_percent = efficiency;
        }

        debug!(
            %date,
            hour,
            level = reading.level_percent,
            used,
            intake,
            pump = %reading.pump_state,
            "ingested reading"
        );

        self.state.last_observed_level = Some(reading.level_percent);
        self.state.last_reading_at = Some(reading.timestamp);
        self.state.last_ingest_at = Some(now);
        self.persist();

        IngestOutcome {
            used_liters: used,
            intake_liters: intake,
            skipped: false,
        }
    }

    /// Minutes since the previous ingestion, clamped to the accrual window.
    fn accrual_minutes(&self, now: DateTime<Utc>) -> f64 {
        let max = self.config.max_accrual_window.as_secs_f64() / 60.0;
        match self.state.last_ingest_at {
            Some(previous) => {
                let elapsed = (now - previous).num_milliseconds().max(0) as f64 / 60_000.0;
                elapsed.min(max)
            }
            None => (self.config.poll_interval.as_secs_f64() / 60.0).min(max),
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn get_summary(&self) -> UsageSummary {
        self.summary_at(Utc::now())
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> UsageSummary {
        summarize(
            &self.state.records,
            self.timezone.local_date(now),
            self.config.efficiency_cap_percent,
        )
    }

    /// The most recent `days` records, oldest first.
    pub fn get_historical_usage(&self, days: usize) -> Vec<DailyUsageRecord> {
        let skip = self.state.records.len().saturating_sub(days);
        self.state.records.values().skip(skip).cloned().collect()
    }

    pub fn today_hourly_usage(&self) -> [f64; HOURS_PER_DAY] {
        self.today_hourly_usage_at(Utc::now())
    }

    pub fn today_hourly_usage_at(&self, now: DateTime<Utc>) -> [f64; HOURS_PER_DAY] {
        self.state
            .records
            .get(&self.timezone.local_date(now))
            .map(|r| r.hourly_usage)
            .unwrap_or([0.0; HOURS_PER_DAY])
    }

    pub fn state(&self) -> &UsageState {
        &self.state
    }

    /// `true` while the last write to the store failed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Drop all records and the level baseline.
    pub fn reset(&mut self) {
        let removed = self.state.records.len();
        self.state = UsageState::default();
        info!(removed, "usage history reset");
        self.persist();
    }

    /// Final write. Unlike per-ingestion writes, a failure is returned.
    pub fn close(mut self) -> Result<()> {
        self.store.save(&self.state)?;
        self.dirty = false;
        debug!(location = %self.store.location(), "usage aggregator closed");
        Ok(())
    }

    fn persist(&mut self) {
        match self.store.save(&self.state) {
            Ok(()) => {
                if self.dirty {
                    info!(location = %self.store.location(), "usage store reconciled after earlier write failure");
                    self.dirty = false;
                }
            }
            Err(e) => {
                if !self.dirty {
                    warn!(error = %e, "failed to persist usage state; keeping it in memory");
                }
                self.dirty = true;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
