//! Cached, coalescing client for the telemetry provider.
//!
//! [`TelemetryClient`] owns two cache slots, the latest reading (30 s TTL)
//! and the charted history series (5 min TTL), and an ordered chain of
//! [`Transport`]s. Fetch operations never fail: when every transport is
//! exhausted or the payload is unusable they fall back to the last good
//! value, or to the connection-error sentinel / an empty series.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tank_core::models::{HistoryPoint, Reading};
use tank_core::time_utils::TimezoneHandler;
use tank_core::{Result, TankError};
use tracing::{debug, info, warn};

use crate::cache::CacheSlot;
use crate::feed::{history_points, reading_from_entry, ChannelFeed, FeedRequest, ReadingContext};
use crate::history::{downsample, DEFAULT_DISPLAY_BUDGET};
use crate::transport::Transport;

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_LATEST_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_HISTORY_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);
/// Largest `results` value the provider honours.
pub const DEFAULT_PROVIDER_MAX_RESULTS: u32 = 8000;
/// Readings older than this are reported as disconnected.
pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 10;
/// The sensor node reports every ten minutes.
pub const SAMPLES_PER_HOUR: u32 = 6;
pub const DEFAULT_CAPACITY_LITERS: f64 = 1000.0;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub channel_id: String,
    /// Read key for private channels.
    pub api_key: Option<String>,
    /// Used when an entry carries no capacity override.
    pub default_capacity_liters: f64,
    pub timezone: TimezoneHandler,
    pub latest_ttl: Duration,
    pub history_ttl: Duration,
    /// Upper bound on each individual transport attempt.
    pub transport_timeout: Duration,
    pub provider_max_results: u32,
    pub display_budget: usize,
    pub stale_after: chrono::Duration,
}

impl TelemetryConfig {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            api_key: None,
            default_capacity_liters: DEFAULT_CAPACITY_LITERS,
            timezone: TimezoneHandler::with_tz(chrono_tz::UTC),
            latest_ttl: DEFAULT_LATEST_TTL,
            history_ttl: DEFAULT_HISTORY_TTL,
            transport_timeout: DEFAULT_TRANSPORT_TIMEOUT,
            provider_max_results: DEFAULT_PROVIDER_MAX_RESULTS,
            display_budget: DEFAULT_DISPLAY_BUDGET,
            stale_after: chrono::Duration::minutes(DEFAULT_STALE_AFTER_MINUTES),
        }
    }

    /// Number of feed entries to request for an `hours` window.
    pub fn results_for_hours(&self, hours: u32) -> u32 {
        hours
            .max(1)
            .saturating_mul(SAMPLES_PER_HOUR)
            .min(self.provider_max_results)
    }
}

/// A history series together with the window it was requested for.
#[derive(Debug, Clone)]
struct HistorySeries {
    hours: u32,
    points: Vec<HistoryPoint>,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Shared entry point for provider data. Wrap in an `Arc` to share between
/// tasks; concurrent fetches for the same key coalesce into one request.
pub struct TelemetryClient {
    config: TelemetryConfig,
    transports: Vec<Box<dyn Transport>>,
    latest: CacheSlot<Reading>,
    history: CacheSlot<HistorySeries>,
    last_error: Mutex<Option<String>>,
}

impl TelemetryClient {
    /// `transports` are tried in the given order.
    pub fn new(config: TelemetryConfig, transports: Vec<Box<dyn Transport>>) -> Self {
        Self {
            config,
            transports,
            latest: CacheSlot::new(),
            history: CacheSlot::new(),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// The most recent reading, served from cache while younger than the
    /// latest TTL.
    pub async fn fetch_latest(&self) -> Reading {
        self.latest_reading(false).await
    }

    /// Like [`fetch_latest`](Self::fetch_latest) but ignores the TTL.
    pub async fn refresh_latest(&self) -> Reading {
        self.latest_reading(true).await
    }

    /// Chronological level series for the last `hours`, downsampled to the
    /// display budget.
    pub async fn fetch_history(&self, hours: u32) -> Vec<HistoryPoint> {
        self.history_series(hours, false).await
    }

    /// Like [`fetch_history`](Self::fetch_history) but ignores the TTL.
    pub async fn refresh_history(&self, hours: u32) -> Vec<HistoryPoint> {
        self.history_series(hours, true).await
    }

    /// Probe the channel metadata endpoint through the primary transport.
    pub async fn test_connection(&self) -> bool {
        let Some(primary) = self.transports.first() else {
            warn!("connection test skipped: no transports configured");
            return false;
        };
        let request = FeedRequest::channel_meta(&self.config.channel_id, self.config.api_key.as_deref());
        match self.attempt(primary.as_ref(), &request).await {
            Ok(_) => {
                info!(transport = primary.name(), "connection test succeeded");
                true
            }
            Err(e) => {
                warn!(error = %e, "connection test failed");
                self.record_error(&e);
                false
            }
        }
    }

    /// Drop both cached values; the next fetch goes to the network.
    pub fn invalidate_cache(&self) {
        self.latest.clear();
        self.history.clear();
        debug!("telemetry cache invalidated");
    }

    /// Description of the most recent failure, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn latest_cache_age(&self) -> Option<Duration> {
        self.latest.age()
    }

    // ── Internals ─────────────────────────────────────────────────────────

    async fn history_series(&self, hours: u32, force: bool) -> Vec<HistoryPoint> {
        let matching = |s: HistorySeries| (s.hours == hours).then_some(s.points);

        if !force {
            if let Some(points) = self.history.fresh(self.config.history_ttl).and_then(matching) {
                debug!(hours, "returning cached history");
                return points;
            }
        }

        let requested = Instant::now();
        let _flight = self.history.begin_flight().await;
        if let Some(points) = self.history.settled_since(requested).and_then(matching) {
            debug!(hours, "reusing history settled by a concurrent caller");
            return points;
        }

        let points = match self.load_history(hours).await {
            Ok(points) => {
                self.clear_error();
                let series = HistorySeries {
                    hours,
                    points: points.clone(),
                };
                if !self.history.store_if_newer(series, requested) {
                    debug!("discarding history older than the cached series");
                }
                points
            }
            Err(e) => {
                warn!(error = %e, hours, "history fetch failed; serving last cached series");
                self.record_error(&e);
                self.history.last_good().map(|s| s.points).unwrap_or_default()
            }
        };
        self.history.settle(HistorySeries {
            hours,
            points: points.clone(),
        });
        points
    }

    async fn latest_reading(&self, force: bool) -> Reading {
        let stale_after = self.config.stale_after;

        if !force {
            if let Some(reading) = self.latest.fresh(self.config.latest_ttl) {
                debug!("returning cached reading");
                return reading.refreshed(Utc::now(), stale_after);
            }
        }

        let requested = Instant::now();
        let _flight = self.latest.begin_flight().await;
        if let Some(reading) = self.latest.settled_since(requested) {
            debug!("reusing reading settled by a concurrent caller");
            return reading.refreshed(Utc::now(), stale_after);
        }

        let reading = match self.load_latest().await {
            Ok(reading) => {
                self.clear_error();
                debug!(
                    level = reading.level_percent,
                    entry_id = ?reading.entry_id,
                    "fetched latest reading"
                );
                if !self.latest.store_if_newer(reading.clone(), requested) {
                    debug!("discarding reading older than the cached one");
                }
                reading
            }
            Err(e) => {
                self.record_error(&e);
                match self.latest.last_good() {
                    Some(cached) => {
                        warn!(error = %e, "latest fetch failed; serving last good reading");
                        cached.refreshed(Utc::now(), stale_after)
                    }
                    None => {
                        warn!(error = %e, "latest fetch failed with nothing cached; returning sentinel");
                        Reading::connection_error(self.config.default_capacity_liters, Utc::now())
                    }
                }
            }
        };
        self.latest.settle(reading.clone());
        reading
    }

    async fn load_latest(&self) -> Result<Reading> {
        let request = FeedRequest::feeds(&self.config.channel_id, self.config.api_key.as_deref(), 1);
        let feed = ChannelFeed::from_value(self.fetch_body(&request).await?)?;
        let entry = feed
            .newest_entry(&self.config.timezone)
            .ok_or_else(|| TankError::Validation("feed contains no entries".to_string()))?;
        let ctx = ReadingContext {
            default_capacity_liters: self.config.default_capacity_liters,
            timezone: self.config.timezone,
            now: Utc::now(),
            stale_after: self.config.stale_after,
        };
        reading_from_entry(entry, &ctx)
    }

    async fn load_history(&self, hours: u32) -> Result<Vec<HistoryPoint>> {
        let results = self.config.results_for_hours(hours);
        let request = FeedRequest::feeds(&self.config.channel_id, self.config.api_key.as_deref(), results);
        let feed = ChannelFeed::from_value(self.fetch_body(&request).await?)?;

        let (points, dropped) = history_points(&feed, &self.config.timezone);
        if dropped > 0 {
            warn!(dropped, received = feed.feeds.len(), "dropped history entries without a usable level");
        }
        Ok(downsample(&points, self.config.display_budget))
    }

    /// Try each transport once, in order; first success wins.
    async fn fetch_body(&self, request: &FeedRequest) -> Result<Value> {
        let mut last: Option<TankError> = None;
        for transport in &self.transports {
            match self.attempt(transport.as_ref(), request).await {
                Ok(body) => {
                    debug!(transport = transport.name(), "transport succeeded");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(transport = transport.name(), error = %e, "transport failed; trying next");
                    last = Some(e);
                }
            }
        }
        Err(TankError::TransportsExhausted {
            attempted: self.transports.len(),
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no transports configured".to_string()),
        })
    }

    async fn attempt(&self, transport: &dyn Transport, request: &FeedRequest) -> Result<Value> {
        let timeout = self.config.transport_timeout;
        match tokio::time::timeout(timeout, transport.get_json(request)).await {
            Ok(result) => result,
            Err(_) => Err(TankError::Timeout {
                transport: transport.name().to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn record_error(&self, error: &TankError) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
