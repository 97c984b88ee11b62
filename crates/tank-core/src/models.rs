use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time_utils::format_recency;

/// Number of hourly buckets carried by every [`DailyUsageRecord`].
pub const HOURS_PER_DAY: usize = 24;

/// Recency label used when a reading never reached the provider.
pub const NEVER_LABEL: &str = "never";

/// Inferred state of the fill pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PumpState {
    On,
    #[default]
    Off,
}

impl PumpState {
    pub fn is_on(self) -> bool {
        self == PumpState::On
    }
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpState::On => f.write_str("ON"),
            PumpState::Off => f.write_str("OFF"),
        }
    }
}

/// Connectivity of the sensor node as seen through its latest reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// The reading is recent.
    Connected,
    /// The provider answered but the newest reading is older than the stale
    /// threshold.
    Disconnected,
    /// No transport could reach the provider, or its payload was unusable.
    ConnectionError,
}

impl ConnectionStatus {
    /// Classify a reading by its age against `stale_after`.
    pub fn from_age(timestamp: DateTime<Utc>, now: DateTime<Utc>, stale_after: chrono::Duration) -> Self {
        if now - timestamp > stale_after {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Connected
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::ConnectionError => f.write_str("connection error"),
        }
    }
}

/// One timestamped sample of tank level and auxiliary sensor fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// When the sensor node posted the sample (provider `created_at`).
    pub timestamp: DateTime<Utc>,
    /// Provider-assigned sequence number, when known.
    pub entry_id: Option<u64>,
    /// Fill level in percent, always within `[0, 100]`.
    pub level_percent: f64,
    pub temperature: Option<f64>,
    /// Distance from the ultrasonic sensor to the water surface.
    pub distance_cm: Option<f64>,
    pub tank_capacity_liters: f64,
    /// Pump flag exactly as reported by the node.
    pub pump_status_raw: Option<f64>,
    pub battery_percent: Option<f64>,
    pub wifi_signal: Option<f64>,
    /// Human-readable age of the sample, e.g. `"3 mins ago"`.
    pub last_updated: String,
    pub connection: ConnectionStatus,
    /// Pump state inferred from the level trend.
    pub pump_state: PumpState,
}

impl Reading {
    /// Zero-volume placeholder returned when no usable data is available.
    pub fn connection_error(tank_capacity_liters: f64, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            entry_id: None,
            level_percent: 0.0,
            temperature: None,
            distance_cm: None,
            tank_capacity_liters,
            pump_status_raw: None,
            battery_percent: None,
            wifi_signal: None,
            last_updated: NEVER_LABEL.to_string(),
            connection: ConnectionStatus::ConnectionError,
            pump_state: PumpState::Off,
        }
    }

    /// `true` for the placeholder built by [`Reading::connection_error`].
    pub fn is_sentinel(&self) -> bool {
        self.connection == ConnectionStatus::ConnectionError
    }

    /// Water currently held, derived from level and capacity.
    pub fn current_volume_liters(&self) -> f64 {
        self.level_percent / 100.0 * self.tank_capacity_liters
    }

    /// Return a copy carrying `state` as its inferred pump state.
    pub fn with_pump_state(mut self, state: PumpState) -> Self {
        self.pump_state = state;
        self
    }

    /// Return a copy whose recency label and connection status are
    /// recomputed against `now`. Sentinels are returned unchanged.
    pub fn refreshed(mut self, now: DateTime<Utc>, stale_after: chrono::Duration) -> Self {
        if self.is_sentinel() {
            return self;
        }
        self.last_updated = format_recency(self.timestamp, now);
        self.connection = ConnectionStatus::from_age(self.timestamp, now, stale_after);
        self
    }
}

/// A single point of the charted level series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub level_percent: f64,
    pub temperature: Option<f64>,
}

/// Usage, intake and pump activity accumulated over one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsageRecord {
    /// Local calendar day this record covers.
    pub date: NaiveDate,
    /// Always the sum of `hourly_usage`.
    pub daily_usage_liters: f64,
    pub daily_intake_liters: f64,
    pub hourly_usage: [f64; HOURS_PER_DAY],
    pub pump_run_time_minutes: f64,
    /// Intake over usage in percent, capped at 95.
    pub efficiency_percent: f64,
}

impl DailyUsageRecord {
    /// Create an all-zero record for `date`.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            daily_usage_liters: 0.0,
            daily_intake_liters: 0.0,
            hourly_usage: [0.0; HOURS_PER_DAY],
            pump_run_time_minutes: 0.0,
            efficiency_percent: 0.0,
        }
    }

    /// Add `liters` to the bucket for `hour` and resynchronise the daily total.
    pub fn add_usage(&mut self, hour: usize, liters: f64) {
        let bucket = hour.min(HOURS_PER_DAY - 1);
        self.hourly_usage[bucket] += liters;
        self.recompute_daily_usage();
    }

    /// Recompute `daily_usage_liters` from the hourly buckets.
    pub fn recompute_daily_usage(&mut self) {
        self.daily_usage_liters = self.hourly_usage.iter().sum();
    }

    /// Intake minus usage.
    pub fn net_liters(&self) -> f64 {
        self.daily_intake_liters - self.daily_usage_liters
    }
}

/// Rollup of usage over a calendar period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub usage_liters: f64,
    pub intake_liters: f64,
    /// Intake minus usage.
    pub net_liters: f64,
    pub efficiency_percent: f64,
    pub pump_run_time_minutes: f64,
    /// Number of daily records that contributed.
    pub days_counted: u32,
    pub average_daily_usage_liters: f64,
    pub average_daily_intake_liters: f64,
}

/// Daily, monthly and yearly projections of the stored records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub daily: PeriodSummary,
    pub monthly: PeriodSummary,
    pub yearly: PeriodSummary,
}
